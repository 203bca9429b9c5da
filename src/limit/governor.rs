//! Outcome classification and backoff policy.

use crate::config::ControllerConfig;
use crate::transport::{codes, ItemResult, TransportError, TransportResult};
use crate::Error;
use std::collections::HashSet;
use std::time::Duration;

/// Decision for one attempt's outcome.
#[derive(Debug, Clone)]
pub enum Classification {
    Success,
    Retry { after: Duration },
    Fatal { reason: Error },
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Success)
    }
}

/// Classifies transport outcomes into retry/fatal decisions.
///
/// Pure over its inputs: the same outcome and attempt count always produce
/// the same decision, so policy is testable without a scheduler. The retry
/// ceiling is folded in here, meaning callers observe exhaustion in exactly
/// one place.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    retryable_codes: HashSet<i32>,
    permanent_codes: HashSet<i32>,
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl RetryGovernor {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base,
            backoff_cap: cfg.backoff_cap,
            retryable_codes: cfg.retryable_codes.clone(),
            permanent_codes: cfg.permanent_codes.clone(),
        }
    }

    /// Exponential backoff: base * 2^attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        Duration::from_millis(delay).min(self.backoff_cap)
    }

    fn code_is_retryable(&self, code: i32) -> bool {
        if self.permanent_codes.contains(&code) {
            return false;
        }
        codes::is_service_protection(code) || self.retryable_codes.contains(&code)
    }

    /// Retry with the given delay, unless the attempt budget is spent.
    fn retry_or_exhaust(&self, attempt: u32, after: Duration, last: Error) -> Classification {
        if attempt >= self.max_retries {
            Classification::Fatal {
                reason: Error::RetriesExhausted {
                    attempts: attempt + 1,
                    last: last.to_string(),
                },
            }
        } else {
            Classification::Retry { after }
        }
    }

    /// Classify the outcome of one batch attempt. `attempt` is 0-based.
    pub fn classify(
        &self,
        attempt: u32,
        outcome: &Result<TransportResult, TransportError>,
    ) -> Classification {
        match outcome {
            // Connectivity failure: the server never answered. Retryable up
            // to the ceiling.
            Err(transport) => {
                let timeout = matches!(transport, TransportError::Timeout(_));
                self.retry_or_exhaust(
                    attempt,
                    self.backoff(attempt),
                    Error::Transport {
                        message: transport.to_string(),
                        timeout,
                    },
                )
            }
            Ok(result) if result.success => Classification::Success,
            Ok(result) => {
                let code = result.error_code.unwrap_or(0);
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unspecified server error".to_string());

                // The server is authoritative on pacing: an explicit wait
                // hint means retry, regardless of the error code.
                if let Some(hint) = result.retry_after {
                    return self.retry_or_exhaust(
                        attempt,
                        hint,
                        Error::RateLimited {
                            code,
                            retry_after: Some(hint),
                        },
                    );
                }

                if self.code_is_retryable(code) {
                    return self.retry_or_exhaust(
                        attempt,
                        self.backoff(attempt),
                        Error::RateLimited {
                            code,
                            retry_after: None,
                        },
                    );
                }

                Classification::Fatal {
                    reason: Error::Permanent {
                        message: format!("{} (code {})", message, code),
                    },
                }
            }
        }
    }

    /// Classify one entry of a continue-on-error response independently.
    pub fn classify_item(&self, attempt: u32, item: &ItemResult) -> Classification {
        if item.success {
            return Classification::Success;
        }
        let code = item.error_code.unwrap_or(0);
        let message = item
            .error_message
            .clone()
            .unwrap_or_else(|| "unspecified item error".to_string());

        if self.code_is_retryable(code) {
            self.retry_or_exhaust(
                attempt,
                self.backoff(attempt),
                Error::RateLimited {
                    code,
                    retry_after: None,
                },
            )
        } else {
            Classification::Fatal {
                reason: Error::Permanent {
                    message: format!("{} (code {})", message, code),
                },
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
