use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g., "config.bulk_max_batch_size")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected bounds, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_validator", "scheduler")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the throughput controller.
///
/// Per-item failures during a run are data (`Outcome`), not errors; this type
/// covers the few conditions that stop a run outright or describe a single
/// classified failure.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limited (code {code}): retry after {retry_after:?}")]
    RateLimited {
        code: i32,
        retry_after: Option<Duration>,
    },

    #[error("Transport error: {message}")]
    Transport { message: String, timeout: bool },

    #[error("Batch rejected atomically: {message}")]
    BatchRejected { message: String },

    #[error("Permanent failure: {message}")]
    Permanent { message: String },

    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Run cancelled")]
    Cancelled,
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether this failure class may resolve on its own if the operation is
    /// retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::Transport { .. } | Error::BatchRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_builder() {
        let ctx = ErrorContext::new()
            .with_field_path("config.max_retries")
            .with_details("must be nonzero")
            .with_source("config_validator");
        assert_eq!(ctx.field_path.as_deref(), Some("config.max_retries"));
        assert_eq!(ctx.details.as_deref(), Some("must be nonzero"));
        assert_eq!(ctx.source.as_deref(), Some("config_validator"));
    }

    #[test]
    fn test_configuration_error_display_includes_context() {
        let err = Error::configuration_with_context(
            "bad bounds",
            ErrorContext::new().with_field_path("config.bulk_max_batch_size"),
        );
        let text = err.to_string();
        assert!(text.contains("bad bounds"));
        assert!(text.contains("config.bulk_max_batch_size"));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(Error::RateLimited {
            code: -2147015902,
            retry_after: None
        }
        .is_retryable());
        assert!(Error::Transport {
            message: "connection reset".into(),
            timeout: false
        }
        .is_retryable());
        assert!(!Error::Permanent {
            message: "authorization denied".into()
        }
        .is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_context_accessor() {
        let err = Error::configuration_with_context("x", ErrorContext::new());
        assert!(err.context().is_some());
        assert!(Error::Cancelled.context().is_none());
    }
}
