//! Bounded worker pool executing planned batches.
//!
//! Each executor obtains one transport handle from the factory at spawn and
//! keeps it for its lifetime; handles are never shared across executors.
//! Completions are emitted as they happen, in whatever order the network
//! produces them; the original item indexes ride along for reordering.

use crate::scheduler::CancelSignal;
use crate::transport::{TransportError, TransportFactory, TransportResult};
use crate::types::Batch;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// One unit of work handed to the pool: a planned batch plus its attempt
/// count (0-based; retries re-enter the pool with a higher count).
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub batch: Batch,
    pub attempt: u32,
}

impl Dispatch {
    pub fn first(batch: Batch) -> Self {
        Self { batch, attempt: 0 }
    }
}

/// Result of one executed dispatch.
#[derive(Debug)]
pub struct Completion {
    pub dispatch: Dispatch,
    pub outcome: Result<TransportResult, TransportError>,
    /// Wall-clock time the transport call took.
    pub execution_time: Duration,
}

pub struct WorkerPool;

impl WorkerPool {
    /// Execute `dispatches` with `parallelism` concurrent executors and
    /// return completions as a channel, unordered.
    ///
    /// The channel has capacity for every dispatch, so executors never block
    /// on a slow consumer. A cancelled signal stops executors before they
    /// claim the next batch; batches already in flight run to completion
    /// (partial submission to the remote API cannot be un-sent).
    pub fn run(
        dispatches: Vec<Dispatch>,
        parallelism: usize,
        factory: &dyn TransportFactory,
        cancel: Option<CancelSignal>,
    ) -> mpsc::Receiver<Completion> {
        let capacity = dispatches.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let workers = parallelism.clamp(1, capacity);
        let queue = Arc::new(Mutex::new(VecDeque::from(dispatches)));

        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let transport = factory.handle();
            tokio::spawn(async move {
                loop {
                    if cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
                        break;
                    }
                    let next = { queue.lock().await.pop_front() };
                    let Some(dispatch) = next else { break };

                    let dispatch_id = Uuid::new_v4();
                    tracing::debug!(
                        worker_id,
                        %dispatch_id,
                        items = dispatch.batch.len(),
                        attempt = dispatch.attempt,
                        mode = ?dispatch.batch.mode,
                        "executing batch"
                    );

                    let start = Instant::now();
                    let outcome = transport.execute(&dispatch.batch).await;
                    let execution_time = start.elapsed();

                    if let Err(ref e) = outcome {
                        tracing::warn!(worker_id, %dispatch_id, error = %e, "transport call failed");
                    }

                    if tx
                        .send(Completion {
                            dispatch,
                            outcome,
                            execution_time,
                        })
                        .await
                        .is_err()
                    {
                        // Receiver gone: the run was abandoned
                        break;
                    }
                }
            });
        }

        rx
    }
}
