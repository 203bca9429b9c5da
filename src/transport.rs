//! Transport abstraction.
//!
//! The controller never speaks a wire protocol itself; the caller supplies a
//! [`Transport`] that executes one batch and reports a structured outcome.
//! A [`TransportFactory`] hands out one independent handle per worker, so
//! connection state is never shared across executors.

use crate::types::Batch;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Service-protection error codes that always classify as retryable.
///
/// These values must match the remote API bit-exactly; anything else defaults
/// to fatal unless added to the configured retryable set.
pub mod codes {
    /// Too many requests inside the sliding window.
    pub const REQUEST_COUNT_EXCEEDED: i32 = -2147015902;
    /// Cumulative execution time inside the window exceeded.
    pub const EXECUTION_TIME_EXCEEDED: i32 = -2147015903;
    /// Too many simultaneous in-flight requests.
    pub const CONCURRENCY_EXCEEDED: i32 = -2147015898;

    pub fn is_service_protection(code: i32) -> bool {
        matches!(
            code,
            REQUEST_COUNT_EXCEEDED | EXECUTION_TIME_EXCEEDED | CONCURRENCY_EXCEEDED
        )
    }
}

/// Connectivity-level failure: the request may never have reached the server.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Per-item outcome inside a continue-on-error response.
#[derive(Debug, Clone)]
pub struct ItemResult {
    /// Original work-item index this entry refers to.
    pub index: usize,
    pub success: bool,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

impl ItemResult {
    pub fn ok(index: usize) -> Self {
        Self {
            index,
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn err(index: usize, code: i32, message: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }
}

/// Structured outcome of one delivered batch request.
#[derive(Debug, Clone, Default)]
pub struct TransportResult {
    pub success: bool,
    /// Present for continue-on-error batches; absent means the whole batch
    /// shares one fate.
    pub item_results: Option<Vec<ItemResult>>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    /// Server-provided wait hint, authoritative over local backoff.
    pub retry_after: Option<Duration>,
    /// Server-recommended degree of parallelism, if advertised.
    pub recommended_parallelism: Option<usize>,
}

impl TransportResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    pub fn with_recommended_parallelism(mut self, dop: usize) -> Self {
        self.recommended_parallelism = Some(dop);
        self
    }

    pub fn with_item_results(mut self, items: Vec<ItemResult>) -> Self {
        self.item_results = Some(items);
        self
    }
}

/// Executes one batch against the remote API.
///
/// Implementations own their connection; the controller calls `execute` from
/// exactly one worker per handle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, batch: &Batch) -> Result<TransportResult, TransportError>;
}

/// Allocates one transport handle per worker at pool construction.
///
/// The remote protocol benefits from connection reuse within one executor's
/// lifetime but must not share connections across executors.
pub trait TransportFactory: Send + Sync {
    fn handle(&self) -> Arc<dyn Transport>;
}

/// Blanket factory for closures returning fresh handles.
impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync,
{
    fn handle(&self) -> Arc<dyn Transport> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_protection_codes() {
        assert!(codes::is_service_protection(codes::REQUEST_COUNT_EXCEEDED));
        assert!(codes::is_service_protection(codes::EXECUTION_TIME_EXCEEDED));
        assert!(codes::is_service_protection(codes::CONCURRENCY_EXCEEDED));
        assert!(!codes::is_service_protection(0));
        assert!(!codes::is_service_protection(-2147015900));
    }

    #[test]
    fn test_transport_result_builders() {
        let r = TransportResult::failed(codes::REQUEST_COUNT_EXCEEDED, "throttled")
            .with_retry_after(Duration::from_secs(2))
            .with_recommended_parallelism(4);
        assert!(!r.success);
        assert_eq!(r.error_code, Some(codes::REQUEST_COUNT_EXCEEDED));
        assert_eq!(r.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(r.recommended_parallelism, Some(4));
    }

    #[test]
    fn test_item_result_constructors() {
        let ok = ItemResult::ok(3);
        assert!(ok.success);
        assert!(ok.error_code.is_none());

        let err = ItemResult::err(4, -1, "bad record");
        assert!(!err.success);
        assert_eq!(err.index, 4);
        assert_eq!(err.error_message.as_deref(), Some("bad record"));
    }
}
