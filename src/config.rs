//! Controller configuration.

use crate::{Error, ErrorContext, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Tunables for a controller run.
///
/// Defaults follow the service-protection limits enforced by the class of
/// bulk APIs this controller targets: a 5-minute sliding window with request,
/// cumulative-execution-time, and concurrency budgets.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Sliding rate-limit window duration.
    pub window_duration: Duration,
    /// Requests allowed per window.
    pub request_limit: u64,
    /// Cumulative execution time allowed per window.
    pub execution_budget: Duration,
    /// Hard ceiling on simultaneous in-flight requests.
    pub concurrency_ceiling: usize,
    /// Retry ceiling per batch/item for retryable failures.
    pub max_retries: u32,
    /// Degree of parallelism at the start of the ramp.
    pub initial_parallelism: usize,
    /// Additive ramp-up step after a clean round.
    pub parallelism_step: usize,
    /// Local ramp ceiling; a server-recommended value lowers it further.
    pub max_parallelism: usize,
    /// Max items per all-or-nothing bulk request.
    pub bulk_max_batch_size: usize,
    /// Max items per continue-on-error mixed request.
    pub mixed_max_batch_size: usize,
    /// Partitions smaller than this skip bulk mode; individual requests with
    /// high parallelism beat a tiny bulk call.
    pub bulk_efficiency_threshold: usize,
    /// Exponential backoff base when the server gives no retry hint.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_cap: Duration,
    /// Stop dispatching on the first `Permanent` outcome.
    pub fail_fast: bool,
    /// Caller-defined error codes treated as retryable, in addition to the
    /// built-in service-protection codes.
    pub retryable_codes: HashSet<i32>,
    /// Caller-defined error codes treated as permanent.
    pub permanent_codes: HashSet<i32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            window_duration: Duration::from_secs(5 * 60),
            request_limit: 6000,
            execution_budget: Duration::from_secs(20 * 60),
            concurrency_ceiling: 52,
            max_retries: 5,
            initial_parallelism: 1,
            parallelism_step: 2,
            max_parallelism: 16,
            bulk_max_batch_size: 1000,
            mixed_max_batch_size: 100,
            bulk_efficiency_threshold: 10,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            fail_fast: false,
            retryable_codes: HashSet::new(),
            permanent_codes: HashSet::new(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window_duration(mut self, d: Duration) -> Self {
        self.window_duration = d;
        self
    }

    pub fn with_request_limit(mut self, n: u64) -> Self {
        self.request_limit = n;
        self
    }

    pub fn with_execution_budget(mut self, d: Duration) -> Self {
        self.execution_budget = d;
        self
    }

    pub fn with_concurrency_ceiling(mut self, n: usize) -> Self {
        self.concurrency_ceiling = n;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_initial_parallelism(mut self, n: usize) -> Self {
        self.initial_parallelism = n;
        self
    }

    pub fn with_parallelism_step(mut self, n: usize) -> Self {
        self.parallelism_step = n;
        self
    }

    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n;
        self
    }

    pub fn with_bulk_max_batch_size(mut self, n: usize) -> Self {
        self.bulk_max_batch_size = n;
        self
    }

    pub fn with_mixed_max_batch_size(mut self, n: usize) -> Self {
        self.mixed_max_batch_size = n;
        self
    }

    pub fn with_bulk_efficiency_threshold(mut self, n: usize) -> Self {
        self.bulk_efficiency_threshold = n;
        self
    }

    pub fn with_backoff_base(mut self, d: Duration) -> Self {
        self.backoff_base = d;
        self
    }

    pub fn with_backoff_cap(mut self, d: Duration) -> Self {
        self.backoff_cap = d;
        self
    }

    pub fn with_fail_fast(mut self, on: bool) -> Self {
        self.fail_fast = on;
        self
    }

    pub fn with_retryable_code(mut self, code: i32) -> Self {
        self.retryable_codes.insert(code);
        self
    }

    pub fn with_permanent_code(mut self, code: i32) -> Self {
        self.permanent_codes.insert(code);
        self
    }

    /// Reject impossible bounds before a run starts. This is the one fatal
    /// configuration path of the controller; everything else is data.
    pub fn validate(&self) -> Result<()> {
        if self.bulk_max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "bulk batch size must be at least 1",
                ErrorContext::new()
                    .with_field_path("config.bulk_max_batch_size")
                    .with_source("config_validator"),
            ));
        }
        if self.mixed_max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "mixed batch size must be at least 1",
                ErrorContext::new()
                    .with_field_path("config.mixed_max_batch_size")
                    .with_source("config_validator"),
            ));
        }
        if self.parallelism_step == 0 {
            return Err(Error::configuration_with_context(
                "parallelism step must be at least 1",
                ErrorContext::new()
                    .with_field_path("config.parallelism_step")
                    .with_source("config_validator"),
            ));
        }
        if self.initial_parallelism == 0 || self.max_parallelism == 0 {
            return Err(Error::configuration_with_context(
                "parallelism must be at least 1",
                ErrorContext::new()
                    .with_field_path("config.initial_parallelism")
                    .with_source("config_validator"),
            ));
        }
        if self.initial_parallelism > self.max_parallelism {
            return Err(Error::configuration_with_context(
                "initial parallelism exceeds max parallelism",
                ErrorContext::new()
                    .with_field_path("config.initial_parallelism")
                    .with_details(format!(
                        "initial {} > max {}",
                        self.initial_parallelism, self.max_parallelism
                    ))
                    .with_source("config_validator"),
            ));
        }
        if self.concurrency_ceiling == 0 {
            return Err(Error::configuration_with_context(
                "concurrency ceiling must be at least 1",
                ErrorContext::new()
                    .with_field_path("config.concurrency_ceiling")
                    .with_source("config_validator"),
            ));
        }
        if self.window_duration.is_zero() {
            return Err(Error::configuration_with_context(
                "window duration must be positive",
                ErrorContext::new()
                    .with_field_path("config.window_duration")
                    .with_source("config_validator"),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(Error::configuration_with_context(
                "backoff base exceeds backoff cap",
                ErrorContext::new()
                    .with_field_path("config.backoff_base")
                    .with_source("config_validator"),
            ));
        }
        Ok(())
    }
}
