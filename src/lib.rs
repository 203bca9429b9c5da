//! # bulkflow
//!
//! Adaptive throughput controller for issuing large volumes of write/read
//! operations against a remote API that enforces sliding-window rate limits
//! and signals backpressure via retry hints.
//!
//! ## Overview
//!
//! The caller supplies a list of logical operations and a transport that
//! executes one batch; the controller discovers safe concurrency
//! empirically, batches heterogeneous operations correctly, and recovers
//! from partial failures without violating the server's all-or-nothing
//! batch semantics.
//!
//! ## Core Philosophy
//!
//! - **Server-authoritative pacing**: explicit retry hints always beat local
//!   backoff computation
//! - **Failures are data**: per-item failures land in the final report, they
//!   never abort the run
//! - **Empirical concurrency**: start at one in-flight request and ramp up
//!   only on observed clean rounds
//! - **Atomicity respected**: an all-or-nothing batch fails whole, never
//!   partially
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkflow::{
//!     AdaptiveScheduler, Capabilities, ControllerConfig, OperationKind,
//!     TargetCapabilities, WorkItem,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bulkflow::Result<()> {
//!     # let factory: Arc<dyn bulkflow::TransportFactory> = unimplemented!();
//!     let caps = Capabilities::new()
//!         .with_target("account", TargetCapabilities::new().with_bulk_all());
//!
//!     let scheduler = AdaptiveScheduler::builder(factory)
//!         .with_config(ControllerConfig::default().with_max_parallelism(8))
//!         .with_capabilities(caps)
//!         .build()?;
//!
//!     let items = vec![
//!         WorkItem::new(0, OperationKind::Create, "account", serde_json::json!({"name": "a"})),
//!         WorkItem::new(1, OperationKind::Create, "account", serde_json::json!({"name": "b"})),
//!     ];
//!
//!     let report = scheduler.run_to_completion(items).await?;
//!     println!("{} succeeded, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Work items, batches, and per-item outcomes |
//! | [`transport`] | Transport trait and structured batch results |
//! | [`limit`] | Sliding-window budget ledger and retry governor |
//! | [`plan`] | Batch planning over operation/target partitions |
//! | [`pool`] | Bounded worker pool with handle-per-worker transports |
//! | [`scheduler`] | Ramp-up/back-off control loop and cancellation |
//! | [`report`] | Result aggregation and the final run report |

pub mod config;
pub mod limit;
pub mod plan;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::ControllerConfig;
pub use limit::governor::{Classification, RetryGovernor};
pub use limit::window::{RateLimitWindow, RequestCost, Reservation, WindowConfig};
pub use plan::{BatchPlanner, Capabilities, TargetCapabilities};
pub use report::{ResultAggregator, RunReport};
pub use scheduler::{
    cancel_pair, AdaptiveScheduler, AdaptiveSchedulerBuilder, CancelHandle, CancelSignal,
    CostEstimator, FixedCostEstimator, ProgressFn, ProgressUpdate, ScheduleState,
};
pub use transport::{
    codes, ItemResult, Transport, TransportError, TransportFactory, TransportResult,
};
pub use types::{
    Batch, BatchKind, BatchMode, OperationKind, Outcome, OutcomeStatus, WorkItem,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
