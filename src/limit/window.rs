//! Sliding-window budget ledger.

use crate::config::ControllerConfig;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a caller should wait before re-checking when a denial is caused
/// by the concurrency ceiling rather than the time-window budgets. Slots free
/// on completion, not on window expiry, so a short poll beats waiting out the
/// window.
const CONCURRENCY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Sliding window duration.
    pub window: Duration,
    /// Requests allowed per window.
    pub request_limit: u64,
    /// Cumulative execution time allowed per window.
    pub execution_budget: Duration,
    /// Simultaneous in-flight reservations allowed.
    pub concurrency_limit: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            request_limit: 6000,
            execution_budget: Duration::from_secs(20 * 60),
            concurrency_limit: 52,
        }
    }
}

impl WindowConfig {
    pub fn from_controller(cfg: &ControllerConfig) -> Self {
        Self {
            window: cfg.window_duration,
            request_limit: cfg.request_limit,
            execution_budget: cfg.execution_budget,
            concurrency_limit: cfg.concurrency_ceiling,
        }
    }
}

/// Estimated cost of one request against the window budgets.
#[derive(Debug, Clone, Copy)]
pub struct RequestCost {
    pub requests: u64,
    pub execution_estimate: Duration,
}

impl RequestCost {
    pub fn new(execution_estimate: Duration) -> Self {
        Self {
            requests: 1,
            execution_estimate,
        }
    }
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Granted,
    Denied { retry_after: Duration },
}

impl Reservation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Reservation::Granted)
    }
}

#[derive(Debug)]
struct State {
    window_start: Instant,
    requests_issued: u64,
    execution_used: Duration,
    concurrency_in_use: usize,
}

/// Facts-only view of the current window.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub requests_issued: u64,
    pub execution_used: Duration,
    pub concurrency_in_use: usize,
    /// Time until the current window expires.
    pub window_remaining: Duration,
}

/// Local ledger for the server's sliding-window budgets.
///
/// Counters roll lazily on first access after expiry; there is no background
/// timer. The concurrency counter is independent of the window and only moves
/// on reserve/complete, so in-flight work survives a roll.
pub struct RateLimitWindow {
    cfg: WindowConfig,
    state: Mutex<State>,
}

impl RateLimitWindow {
    pub fn new(cfg: WindowConfig) -> Self {
        let state = Mutex::new(State {
            window_start: Instant::now(),
            requests_issued: 0,
            execution_used: Duration::ZERO,
            concurrency_in_use: 0,
        });
        Self { cfg, state }
    }

    fn roll_locked(cfg: &WindowConfig, st: &mut State) {
        let now = Instant::now();
        if now.duration_since(st.window_start) >= cfg.window {
            st.window_start = now;
            st.requests_issued = 0;
            st.execution_used = Duration::ZERO;
            // concurrency_in_use persists: in-flight work is still in flight
        }
    }

    fn window_remaining_locked(cfg: &WindowConfig, st: &State) -> Duration {
        (st.window_start + cfg.window).saturating_duration_since(Instant::now())
    }

    /// Try to reserve capacity for one request.
    ///
    /// Granted reservations increment all counters; a grant must be paired
    /// with a later [`complete`](Self::complete). Denials report the
    /// estimated wait until capacity returns, floored at zero. An idle
    /// window always grants, even when the estimate exceeds a whole-window
    /// budget.
    pub async fn try_reserve(&self, cost: &RequestCost) -> Reservation {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;

        // Concurrency ceiling first: independent of the time-window counters.
        if st.concurrency_in_use >= cfg.concurrency_limit {
            tracing::debug!(
                in_use = st.concurrency_in_use,
                limit = cfg.concurrency_limit,
                "window reservation denied: concurrency ceiling"
            );
            return Reservation::Denied {
                retry_after: CONCURRENCY_POLL,
            };
        }

        Self::roll_locked(cfg, &mut st);

        let over_requests = st.requests_issued + cost.requests > cfg.request_limit;
        let over_execution = st.execution_used + cost.execution_estimate > cfg.execution_budget;
        // An idle window always grants one request: a cost estimate larger
        // than the whole budget could otherwise never be admitted, and the
        // batch would be re-deferred past every window roll forever.
        let idle = st.requests_issued == 0
            && st.execution_used.is_zero()
            && st.concurrency_in_use == 0;
        if (over_requests || over_execution) && !idle {
            let retry_after = Self::window_remaining_locked(cfg, &st);
            tracing::debug!(
                requests = st.requests_issued,
                execution_ms = st.execution_used.as_millis() as u64,
                retry_after_ms = retry_after.as_millis() as u64,
                "window reservation denied: budget exhausted"
            );
            return Reservation::Denied { retry_after };
        }

        st.requests_issued += cost.requests;
        st.execution_used += cost.execution_estimate;
        st.concurrency_in_use += 1;
        Reservation::Granted
    }

    /// Release one granted reservation, reconciling the execution estimate
    /// with what the request actually took.
    pub async fn complete(&self, cost: &RequestCost, actual_execution: Duration) {
        let mut st = self.state.lock().await;
        st.concurrency_in_use = st.concurrency_in_use.saturating_sub(1);
        // Swap the estimate for the measured time within the current window.
        if actual_execution > cost.execution_estimate {
            st.execution_used += actual_execution - cost.execution_estimate;
        } else {
            st.execution_used = st
                .execution_used
                .saturating_sub(cost.execution_estimate - actual_execution);
        }
    }

    pub async fn snapshot(&self) -> WindowSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        Self::roll_locked(cfg, &mut st);
        WindowSnapshot {
            requests_issued: st.requests_issued,
            execution_used: st.execution_used,
            concurrency_in_use: st.concurrency_in_use,
            window_remaining: Self::window_remaining_locked(cfg, &st),
        }
    }
}
