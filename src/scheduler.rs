//! Adaptive scheduling: the ramp-up/back-off control loop driving the run.

use crate::config::ControllerConfig;
use crate::limit::governor::{Classification, RetryGovernor};
use crate::limit::window::{RateLimitWindow, RequestCost, Reservation, WindowConfig};
use crate::plan::{BatchPlanner, Capabilities};
use crate::pool::{Completion, Dispatch, WorkerPool};
use crate::report::{ResultAggregator, RunReport};
use crate::transport::TransportFactory;
use crate::types::{Batch, BatchKind, BatchMode, OperationKind, Outcome, WorkItem};
use crate::{Error, ErrorContext, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Snapshot passed to the progress callback after each batch completion.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub total: usize,
    pub parallelism: usize,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Create a linked cancellation handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Caller-side handle: request the run to stop dispatching new batches.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Scheduler-side signal. In-flight batches always finish; cancellation only
/// stops new dispatch.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested. A dropped handle without a
    /// cancel never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Estimates the execution-time cost a batch will charge against the window.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, batch: &Batch) -> Duration;
}

/// Default estimator: fixed per-operation-kind constants summed over the
/// batch. The exact server-side cost model is not published, so this stays
/// pluggable.
#[derive(Debug, Clone)]
pub struct FixedCostEstimator {
    pub create: Duration,
    pub update: Duration,
    pub upsert: Duration,
    pub delete: Duration,
}

impl Default for FixedCostEstimator {
    fn default() -> Self {
        Self {
            create: Duration::from_millis(1000),
            update: Duration::from_millis(800),
            upsert: Duration::from_millis(1000),
            delete: Duration::from_millis(500),
        }
    }
}

impl CostEstimator for FixedCostEstimator {
    fn estimate(&self, batch: &Batch) -> Duration {
        batch
            .items
            .iter()
            .map(|i| match i.kind {
                OperationKind::Create => self.create,
                OperationKind::Update => self.update,
                OperationKind::Upsert => self.upsert,
                OperationKind::Delete => self.delete,
            })
            .sum()
    }
}

/// Mutable scheduling state, owned exclusively by the scheduler and touched
/// only between rounds, never mid-batch.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub parallelism: usize,
    pub batch_size: usize,
    pub consecutive_successes: u32,
    pub last_backoff_until: Option<Instant>,
    steady: bool,
    step: usize,
    max_parallelism: usize,
    /// Lowest server-recommended parallelism observed this run.
    hint_ceiling: Option<usize>,
}

/// Clean rounds before the ramp freezes.
const STEADY_STATE_ROUNDS: u32 = 3;

impl ScheduleState {
    pub fn new(cfg: &ControllerConfig) -> Self {
        Self {
            parallelism: cfg.initial_parallelism,
            batch_size: cfg.bulk_max_batch_size,
            consecutive_successes: 0,
            last_backoff_until: None,
            steady: false,
            step: cfg.parallelism_step,
            max_parallelism: cfg.max_parallelism,
            hint_ceiling: None,
        }
    }

    fn ceiling(&self) -> usize {
        match self.hint_ceiling {
            Some(hint) => hint.min(self.max_parallelism).max(1),
            None => self.max_parallelism,
        }
    }

    /// The server advertised a recommended degree of parallelism; it becomes
    /// the ramp ceiling (lowest observed value wins).
    pub fn observe_hint(&mut self, dop: usize) {
        let dop = dop.max(1);
        self.hint_ceiling = Some(match self.hint_ceiling {
            Some(prev) => prev.min(dop),
            None => dop,
        });
        if self.parallelism > self.ceiling() {
            self.parallelism = self.ceiling();
        }
    }

    /// A round completed with zero retries.
    pub fn on_clean_round(&mut self) {
        self.consecutive_successes += 1;
        if self.consecutive_successes >= STEADY_STATE_ROUNDS {
            self.steady = true;
        }
        if !self.steady {
            self.parallelism = (self.parallelism + self.step).min(self.ceiling());
        }
    }

    /// A retry was observed: halve parallelism (floor 1) and hold dispatch
    /// until the deadline.
    pub fn back_off(&mut self, after: Duration) {
        self.parallelism = (self.parallelism / 2).max(1);
        self.consecutive_successes = 0;
        self.steady = false;
        let until = Instant::now() + after;
        self.last_backoff_until = Some(match self.last_backoff_until {
            Some(prev) => prev.max(until),
            None => until,
        });
    }

    pub fn is_steady(&self) -> bool {
        self.steady
    }
}

struct DeferredDispatch {
    dispatch: Dispatch,
    ready_at: Instant,
}

/// Orchestrates a whole run: plans batches, sizes the worker pool, paces
/// dispatch from window/governor feedback, and aggregates outcomes.
pub struct AdaptiveScheduler {
    config: ControllerConfig,
    planner: BatchPlanner,
    governor: RetryGovernor,
    window: RateLimitWindow,
    factory: Arc<dyn TransportFactory>,
    capabilities: Capabilities,
    estimator: Arc<dyn CostEstimator>,
    progress: Option<ProgressFn>,
    cancel: Option<CancelSignal>,
}

pub struct AdaptiveSchedulerBuilder {
    config: ControllerConfig,
    factory: Arc<dyn TransportFactory>,
    capabilities: Capabilities,
    estimator: Arc<dyn CostEstimator>,
    progress: Option<ProgressFn>,
    cancel: Option<CancelSignal>,
}

impl AdaptiveSchedulerBuilder {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config: ControllerConfig::default(),
            factory,
            capabilities: Capabilities::new(),
            estimator: Arc::new(FixedCostEstimator::default()),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cost_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn build(self) -> Result<AdaptiveScheduler> {
        self.config.validate()?;
        Ok(AdaptiveScheduler {
            planner: BatchPlanner::from_config(&self.config),
            governor: RetryGovernor::from_config(&self.config),
            window: RateLimitWindow::new(WindowConfig::from_controller(&self.config)),
            config: self.config,
            factory: self.factory,
            capabilities: self.capabilities,
            estimator: self.estimator,
            progress: self.progress,
            cancel: self.cancel,
        })
    }
}

impl AdaptiveScheduler {
    pub fn builder(factory: Arc<dyn TransportFactory>) -> AdaptiveSchedulerBuilder {
        AdaptiveSchedulerBuilder::new(factory)
    }

    /// Drive every work item to a final outcome.
    ///
    /// Per-item failures are data in the returned report; this only errors on
    /// invalid input (duplicate or out-of-range indexes).
    pub async fn run_to_completion(&self, items: Vec<WorkItem>) -> Result<RunReport> {
        let start = Instant::now();
        let total = items.len();
        Self::validate_indexes(&items)?;

        let mut aggregator = ResultAggregator::new(total);
        if items.is_empty() {
            return Ok(aggregator.finalize(start.elapsed()));
        }

        let mut cancel = self.cancel.clone();
        let mut state = ScheduleState::new(&self.config);

        // Scheduler-owned deferred queue; retries go to the front so older
        // work is never starved by fresh work.
        let mut deferred: VecDeque<DeferredDispatch> = self
            .planner
            .plan(items, &self.capabilities, state.batch_size)
            .into_iter()
            .map(|batch| DeferredDispatch {
                dispatch: Dispatch::first(batch),
                ready_at: Instant::now(),
            })
            .collect();

        let mut was_cancelled = false;
        while !deferred.is_empty() {
            if Self::check_cancelled(&cancel) {
                tracing::info!("run cancelled, stopping dispatch");
                was_cancelled = true;
                break;
            }

            // Respect a standing back-off deadline before dispatching more.
            if let Some(until) = state.last_backoff_until.take() {
                if Self::sleep_or_cancel(until, &mut cancel).await {
                    was_cancelled = true;
                    break;
                }
            }

            // Pull up to `parallelism` ready dispatches for this round, in
            // queue order; if nothing is ready, wait for the earliest
            // deferral. Rounds are paced at the current parallelism so the
            // ramp reacts to fresh feedback every round.
            let now = Instant::now();
            let mut round: Vec<Dispatch> = Vec::new();
            let mut waiting: VecDeque<DeferredDispatch> = VecDeque::new();
            for entry in deferred.drain(..) {
                if round.len() < state.parallelism && entry.ready_at <= now {
                    round.push(entry.dispatch);
                } else {
                    waiting.push_back(entry);
                }
            }
            deferred = waiting;

            if round.is_empty() {
                // Nothing was ready: the wait is for time, not capacity.
                let earliest = deferred
                    .iter()
                    .map(|d| d.ready_at)
                    .min()
                    .unwrap_or_else(Instant::now);
                if Self::sleep_or_cancel(earliest, &mut cancel).await {
                    was_cancelled = true;
                    break;
                }
                continue;
            }

            // Reserve window capacity per dispatch; denials defer locally
            // without consuming a retry attempt.
            let mut reserved: Vec<(Dispatch, RequestCost)> = Vec::new();
            for dispatch in round {
                let cost = RequestCost::new(self.estimator.estimate(&dispatch.batch));
                match self.window.try_reserve(&cost).await {
                    Reservation::Granted => reserved.push((dispatch, cost)),
                    Reservation::Denied { retry_after } => {
                        deferred.push_front(DeferredDispatch {
                            dispatch,
                            ready_at: Instant::now() + retry_after,
                        });
                    }
                }
            }
            if reserved.is_empty() {
                continue;
            }

            tracing::debug!(
                batches = reserved.len(),
                parallelism = state.parallelism,
                steady = state.is_steady(),
                "dispatching round"
            );

            let dispatches: Vec<Dispatch> = reserved.into_iter().map(|(d, _)| d).collect();
            let mut rx = WorkerPool::run(
                dispatches,
                state.parallelism,
                self.factory.as_ref(),
                cancel.clone(),
            );

            let mut round_retry_after: Option<Duration> = None;
            let mut retry_items: Vec<(WorkItem, u32)> = Vec::new();
            let mut round_saw_fatal = false;
            let mut completed_in_round = 0usize;

            while let Some(completion) = rx.recv().await {
                // Release the window slot using the measured execution time.
                // Completions arrive unordered; the estimator is
                // deterministic per batch, so recompute the reserved cost
                // instead of correlating with dispatch order.
                let cost = RequestCost::new(self.estimator.estimate(&completion.dispatch.batch));
                self.window.complete(&cost, completion.execution_time).await;
                aggregator.note_transport_call();
                completed_in_round += 1;

                if let Ok(result) = &completion.outcome {
                    if let Some(dop) = result.recommended_parallelism {
                        state.observe_hint(dop);
                    }
                }

                self.apply_completion(
                    completion,
                    &mut aggregator,
                    &mut deferred,
                    &mut retry_items,
                    &mut round_retry_after,
                    &mut round_saw_fatal,
                );

                if let Some(progress) = &self.progress {
                    progress(ProgressUpdate {
                        completed: aggregator.resolved(),
                        total,
                        parallelism: state.parallelism,
                    });
                }
            }

            // Re-batch item-level retries into continue-on-error batches.
            if !retry_items.is_empty() {
                let after = round_retry_after.unwrap_or(self.config.backoff_base);
                for dispatch in self.rebatch_retries(retry_items) {
                    deferred.push_front(DeferredDispatch {
                        dispatch,
                        ready_at: Instant::now() + after,
                    });
                }
            }

            if round_saw_fatal && self.config.fail_fast {
                tracing::warn!("fatal outcome with fail-fast enabled, stopping run");
                break;
            }

            match round_retry_after {
                Some(after) => {
                    state.back_off(after);
                    tracing::info!(
                        parallelism = state.parallelism,
                        backoff_ms = after.as_millis() as u64,
                        "round saw retries, backing off"
                    );
                }
                // A round is only clean if neither retries nor fatals were
                // observed; fatal-only rounds hold the current pace.
                None if !round_saw_fatal => {
                    state.on_clean_round();
                    tracing::debug!(
                        parallelism = state.parallelism,
                        completed = completed_in_round,
                        "clean round"
                    );
                }
                None => {}
            }
        }

        // Cancellation leaves unresolved items; mark them so callers can
        // tell a cancelled skip from a fail-fast one.
        if was_cancelled {
            for index in 0..total {
                if !aggregator.is_resolved(index) {
                    aggregator.record(Outcome::cancelled(index));
                }
            }
        }

        Ok(aggregator.finalize(start.elapsed()))
    }

    /// Apply one completion: classify, record outcomes, queue retries.
    fn apply_completion(
        &self,
        completion: Completion,
        aggregator: &mut ResultAggregator,
        deferred: &mut VecDeque<DeferredDispatch>,
        retry_items: &mut Vec<(WorkItem, u32)>,
        round_retry_after: &mut Option<Duration>,
        round_saw_fatal: &mut bool,
    ) {
        let attempt = completion.dispatch.attempt;
        let attempts = attempt + 1;
        let batch = completion.dispatch.batch;

        match self.governor.classify(attempt, &completion.outcome) {
            Classification::Success => {
                let per_item = completion
                    .outcome
                    .as_ref()
                    .ok()
                    .and_then(|r| r.item_results.clone());
                match (batch.mode, per_item) {
                    (BatchMode::ContinueOnError, Some(results)) => {
                        // A conforming transport reports every member; an
                        // item missing from the response is a contract
                        // violation and must not finalize as skipped.
                        for item in &batch.items {
                            if !results.iter().any(|r| r.index == item.index) {
                                *round_saw_fatal = true;
                                aggregator.record(Outcome::failed(
                                    item.index,
                                    attempts,
                                    Error::Transport {
                                        message: format!(
                                            "batch response carried no result for item {}",
                                            item.index
                                        ),
                                        timeout: false,
                                    },
                                ));
                            }
                        }
                        for item_result in results {
                            match self.governor.classify_item(attempt, &item_result) {
                                Classification::Success => {
                                    aggregator.record(Outcome::succeeded(item_result.index, attempts));
                                }
                                Classification::Retry { after } => {
                                    if let Some(item) =
                                        batch.items.iter().find(|i| i.index == item_result.index)
                                    {
                                        retry_items.push((item.clone(), attempts));
                                    }
                                    *round_retry_after =
                                        Some(round_retry_after.map_or(after, |p| p.max(after)));
                                }
                                Classification::Fatal { reason } => {
                                    *round_saw_fatal = true;
                                    aggregator.record(Outcome::failed(
                                        item_result.index,
                                        attempts,
                                        reason,
                                    ));
                                }
                            }
                        }
                    }
                    _ => {
                        for index in batch.item_indexes() {
                            aggregator.record(Outcome::succeeded(index, attempts));
                        }
                    }
                }
            }
            Classification::Retry { after } => {
                *round_retry_after = Some(round_retry_after.map_or(after, |p| p.max(after)));
                deferred.push_front(DeferredDispatch {
                    dispatch: Dispatch {
                        batch,
                        attempt: attempts,
                    },
                    ready_at: Instant::now() + after,
                });
            }
            Classification::Fatal { reason } => {
                // All-or-nothing semantics: every member shares the same
                // final error, never a partial success.
                *round_saw_fatal = true;
                let reason = match batch.mode {
                    BatchMode::AllOrNothing => Error::BatchRejected {
                        message: reason.to_string(),
                    },
                    BatchMode::ContinueOnError => reason,
                };
                for index in batch.item_indexes() {
                    aggregator.record(Outcome::failed(index, attempts, reason.clone()));
                }
            }
        }
    }

    /// Pack retryable items back into continue-on-error batches, grouped by
    /// attempt count so the governor's ceiling stays accurate per item.
    fn rebatch_retries(&self, mut retry_items: Vec<(WorkItem, u32)>) -> Vec<Dispatch> {
        retry_items.sort_by_key(|(item, _)| item.index);
        let mut by_attempt: Vec<(u32, Vec<WorkItem>)> = Vec::new();
        for (item, attempts) in retry_items {
            match by_attempt.iter_mut().find(|(a, _)| *a == attempts) {
                Some((_, items)) => items.push(item),
                None => by_attempt.push((attempts, vec![item])),
            }
        }

        let mut dispatches = Vec::new();
        for (attempts, items) in by_attempt {
            for chunk in items.chunks(self.config.mixed_max_batch_size.max(1)) {
                let kind = if chunk
                    .iter()
                    .all(|i| i.kind == chunk[0].kind && i.target == chunk[0].target)
                {
                    BatchKind::Homogeneous(chunk[0].kind)
                } else {
                    BatchKind::Mixed
                };
                dispatches.push(Dispatch {
                    batch: Batch {
                        items: chunk.to_vec(),
                        mode: BatchMode::ContinueOnError,
                        kind,
                    },
                    attempt: attempts,
                });
            }
        }
        dispatches
    }

    fn validate_indexes(items: &[WorkItem]) -> Result<()> {
        let total = items.len();
        let mut seen = vec![false; total];
        for item in items {
            if item.index >= total || seen[item.index] {
                return Err(Error::configuration_with_context(
                    "work item indexes must be unique ordinals within the input",
                    ErrorContext::new()
                        .with_field_path("items.index")
                        .with_details(format!("offending index {}", item.index))
                        .with_source("scheduler"),
                ));
            }
            seen[item.index] = true;
        }
        Ok(())
    }

    fn check_cancelled(cancel: &Option<CancelSignal>) -> bool {
        cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }

    /// Sleep until `deadline`, waking early on cancellation. Returns true if
    /// cancelled.
    async fn sleep_or_cancel(deadline: Instant, cancel: &mut Option<CancelSignal>) -> bool {
        let deadline = tokio::time::Instant::from_std(deadline);
        match cancel {
            Some(signal) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => false,
                    _ = signal.cancelled() => true,
                }
            }
            None => {
                tokio::time::sleep_until(deadline).await;
                false
            }
        }
    }
}
