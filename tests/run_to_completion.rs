//! End-to-end runs through the scheduler with a scripted transport.

use async_trait::async_trait;
use bulkflow::{
    AdaptiveScheduler, Batch, Capabilities, ControllerConfig, ItemResult, OperationKind,
    OutcomeStatus, TargetCapabilities, Transport, TransportError, TransportFactory,
    TransportResult, WorkItem,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder =
    dyn Fn(usize, &Batch) -> Result<TransportResult, TransportError> + Send + Sync + 'static;

/// Transport whose responses are scripted per call index. All handles from
/// one factory share the call counter and size log, but each worker still
/// gets its own handle.
struct ScriptedTransport {
    respond: Arc<Responder>,
    calls: Arc<AtomicUsize>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    delay: Duration,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, batch: &Batch) -> Result<TransportResult, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(batch.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(call, batch)
    }
}

struct ScriptedFactory {
    respond: Arc<Responder>,
    calls: Arc<AtomicUsize>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    delay: Duration,
}

impl ScriptedFactory {
    fn new(
        respond: impl Fn(usize, &Batch) -> Result<TransportResult, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Arc::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn batch_sizes(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.batch_sizes)
    }
}

impl TransportFactory for ScriptedFactory {
    fn handle(&self) -> Arc<dyn Transport> {
        Arc::new(ScriptedTransport {
            respond: Arc::clone(&self.respond),
            calls: Arc::clone(&self.calls),
            batch_sizes: Arc::clone(&self.batch_sizes),
            delay: self.delay,
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn creates(n: usize, target: &str) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem::new(i, OperationKind::Create, target, json!({ "n": i })))
        .collect()
}

fn bulk_caps(target: &str) -> Capabilities {
    Capabilities::new().with_target(target, TargetCapabilities::new().with_bulk_all())
}

#[tokio::test]
async fn bulk_creates_run_in_chunks_of_four() {
    init_tracing();
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));
    let calls = factory.calls();
    let sizes = factory.batch_sizes();

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(
            ControllerConfig::default()
                .with_bulk_max_batch_size(4)
                .with_bulk_efficiency_threshold(2),
        )
        .with_capabilities(bulk_caps("account"))
        .build()
        .unwrap();

    let report = scheduler.run_to_completion(creates(10, "account")).await.unwrap();

    assert_eq!(report.total(), 10);
    assert_eq!(report.succeeded, 10);
    assert_eq!(report.failed, 0);
    assert!(report.all_succeeded());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let mut observed = sizes.lock().unwrap().clone();
    observed.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(observed, vec![4, 4, 2]);

    // Every outcome is first-try and in input order
    for (i, o) in report.outcomes.iter().enumerate() {
        assert_eq!(o.index, i);
        assert_eq!(o.status, OutcomeStatus::Succeeded);
        assert_eq!(o.attempts, 1);
    }
}

#[tokio::test]
async fn permanent_item_fails_alone_in_continue_on_error_batch() {
    init_tracing();
    // One continue-on-error batch of 5; item 2 hits an authorization error
    let factory = ScriptedFactory::new(|_, batch| {
        let results = batch
            .items
            .iter()
            .map(|item| {
                if item.index == 2 {
                    ItemResult::err(2, 401, "authorization denied")
                } else {
                    ItemResult::ok(item.index)
                }
            })
            .collect();
        Ok(TransportResult::ok().with_item_results(results))
    });
    let calls = factory.calls();

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(ControllerConfig::default())
        .build()
        .unwrap();

    let report = scheduler
        .run_to_completion(creates(5, "note"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    match &report.outcomes[2].status {
        OutcomeStatus::Failed(msg) => assert!(msg.contains("authorization denied")),
        other => panic!("item 2 should fail, got {:?}", other),
    }
    for i in [0, 1, 3, 4] {
        assert_eq!(report.outcomes[i].status, OutcomeStatus::Succeeded);
    }
}

#[tokio::test]
async fn empty_input_makes_zero_transport_calls() {
    init_tracing();
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));
    let calls = factory.calls();

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory)).build().unwrap();
    let report = scheduler.run_to_completion(Vec::new()).await.unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.transport_calls, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_skips_unresolved_items() {
    init_tracing();
    let (handle, signal) = bulkflow::cancel_pair();
    let handle = Arc::new(handle);
    let trigger = Arc::clone(&handle);

    // Cancel the run from inside the second transport call
    let factory = ScriptedFactory::new(move |call, _| {
        if call == 1 {
            trigger.cancel();
        }
        Ok(TransportResult::ok())
    })
    .with_delay(Duration::from_millis(5));

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(ControllerConfig::default().with_mixed_max_batch_size(1))
        .with_cancel(signal)
        .build()
        .unwrap();

    let report = scheduler
        .run_to_completion(creates(6, "note"))
        .await
        .unwrap();

    // Exactly one outcome per item, in order, and at least one of each fate
    assert_eq!(report.total(), 6);
    for (i, o) in report.outcomes.iter().enumerate() {
        assert_eq!(o.index, i);
    }
    assert!(report.skipped >= 1, "cancellation should leave skipped items");
    assert!(report.succeeded >= 1, "in-flight batches finish");
    assert_eq!(report.succeeded + report.skipped, 6);
    for o in &report.outcomes {
        if o.status == OutcomeStatus::Skipped {
            assert_eq!(o.attempts, 0);
            // A cancelled skip carries the reason, unlike a fail-fast skip
            assert!(matches!(o.last_error, Some(bulkflow::Error::Cancelled)));
        }
    }
}

#[tokio::test]
async fn batch_cost_above_execution_budget_still_dispatches() {
    init_tracing();
    // Two creates estimate to 2s of execution, above a 1s whole-window
    // budget; the idle window must admit the batch instead of re-deferring
    // it past every roll
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));
    let calls = factory.calls();

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(
            ControllerConfig::default()
                .with_window_duration(Duration::from_millis(50))
                .with_execution_budget(Duration::from_secs(1)),
        )
        .build()
        .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.run_to_completion(creates(2, "note")),
    )
    .await
    .expect("run must terminate")
    .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_item_results_surface_as_failures() {
    init_tracing();
    // The transport violates its contract and reports nothing for item 1
    let factory = ScriptedFactory::new(|_, _| {
        Ok(TransportResult::ok().with_item_results(vec![ItemResult::ok(0), ItemResult::ok(2)]))
    });
    let calls = factory.calls();

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory)).build().unwrap();
    let report = scheduler.run_to_completion(creates(3, "note")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    match &report.outcomes[1].status {
        OutcomeStatus::Failed(msg) => assert!(msg.contains("no result")),
        other => panic!("item 1 should fail, got {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_indexes_are_rejected() {
    init_tracing();
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));
    let scheduler = AdaptiveScheduler::builder(Arc::new(factory)).build().unwrap();

    let items = vec![
        WorkItem::new(0, OperationKind::Create, "note", json!({})),
        WorkItem::new(0, OperationKind::Create, "note", json!({})),
    ];
    let err = scheduler.run_to_completion(items).await.unwrap_err();
    assert!(matches!(err, bulkflow::Error::Configuration { .. }));
}

#[tokio::test]
async fn progress_callback_reports_each_completion() {
    init_tracing();
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));

    let updates: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);

    let scheduler = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(
            ControllerConfig::default()
                .with_bulk_max_batch_size(3)
                .with_bulk_efficiency_threshold(2),
        )
        .with_capabilities(bulk_caps("account"))
        .with_progress(Arc::new(move |p| {
            sink.lock().unwrap().push((p.completed, p.total));
        }))
        .build()
        .unwrap();

    let report = scheduler
        .run_to_completion(creates(9, "account"))
        .await
        .unwrap();
    assert_eq!(report.succeeded, 9);

    let updates = updates.lock().unwrap();
    // One update per batch completion, and the last one covers everything
    assert_eq!(updates.len(), 3);
    assert_eq!(updates.last().copied(), Some((9, 9)));
    for (completed, total) in updates.iter() {
        assert_eq!(*total, 9);
        assert!(*completed <= 9);
    }
}

#[tokio::test]
async fn invalid_config_fails_at_build() {
    init_tracing();
    let factory = ScriptedFactory::new(|_, _| Ok(TransportResult::ok()));
    let result = AdaptiveScheduler::builder(Arc::new(factory))
        .with_config(ControllerConfig::default().with_bulk_max_batch_size(0))
        .build();
    assert!(result.is_err());
}
