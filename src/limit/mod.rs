//! # Throughput Limiting Module
//!
//! This module provides the two pacing primitives the scheduler builds on:
//! local budget accounting for the server's sliding window, and pure
//! classification of transport outcomes into retry decisions.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`window`] | Sliding-window budget ledger (requests, execution time, concurrency) |
//! | [`governor`] | Retry/fatal classification with server-hint-first backoff |
//!
//! ## Sliding Window
//!
//! The window tracks three budgets at once and resets lazily on first access
//! after expiry, never via a background timer:
//!
//! ```rust
//! use bulkflow::limit::window::{RateLimitWindow, RequestCost, Reservation, WindowConfig};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let window = RateLimitWindow::new(WindowConfig::default());
//! let cost = RequestCost::new(Duration::from_secs(1));
//! match window.try_reserve(&cost).await {
//!     Reservation::Granted => { /* issue the request */ }
//!     Reservation::Denied { retry_after } => { /* defer the batch */ }
//! }
//! # });
//! ```
//!
//! ## Retry Governor
//!
//! The governor is a pure function over one attempt's outcome. A server wait
//! hint is authoritative; known service-protection codes fall back to
//! exponential backoff; everything else is fatal:
//!
//! ```rust
//! use bulkflow::limit::governor::{Classification, RetryGovernor};
//! use bulkflow::transport::TransportResult;
//!
//! let governor = RetryGovernor::default();
//! let outcome = Ok(TransportResult::ok());
//! assert!(matches!(governor.classify(0, &outcome), Classification::Success));
//! ```

pub mod governor;
pub mod window;
