//! Batch planning: group pending work into executable batches.

use crate::config::ControllerConfig;
use crate::types::{Batch, BatchKind, BatchMode, OperationKind, WorkItem};
use std::collections::{HashMap, HashSet};

/// What one target (logical entity/table) supports.
#[derive(Debug, Clone, Default)]
pub struct TargetCapabilities {
    bulk_kinds: HashSet<OperationKind>,
    /// Per-target bulk size limit, if tighter than the configured maximum.
    bulk_max_size: Option<usize>,
}

impl TargetCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one operation kind as supported by the target's all-or-nothing
    /// bulk endpoint.
    pub fn with_bulk(mut self, kind: OperationKind) -> Self {
        self.bulk_kinds.insert(kind);
        self
    }

    /// Mark every operation kind as bulk-capable.
    pub fn with_bulk_all(mut self) -> Self {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Upsert,
            OperationKind::Delete,
        ] {
            self.bulk_kinds.insert(kind);
        }
        self
    }

    pub fn with_bulk_max_size(mut self, n: usize) -> Self {
        self.bulk_max_size = Some(n);
        self
    }

    pub fn supports_bulk(&self, kind: OperationKind) -> bool {
        self.bulk_kinds.contains(&kind)
    }
}

/// Capability map keyed by target name. Targets absent from the map have no
/// bulk support and fall back to continue-on-error batching.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    targets: HashMap<String, TargetCapabilities>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, name: impl Into<String>, caps: TargetCapabilities) -> Self {
        self.targets.insert(name.into(), caps);
        self
    }

    pub fn supports_bulk(&self, target: &str, kind: OperationKind) -> bool {
        self.targets
            .get(target)
            .map(|t| t.supports_bulk(kind))
            .unwrap_or(false)
    }

    pub fn bulk_max_size(&self, target: &str) -> Option<usize> {
        self.targets.get(target).and_then(|t| t.bulk_max_size)
    }
}

/// Groups pending work items into request batches.
///
/// Homogeneous partitions with bulk support become all-or-nothing batches;
/// everything else is packed into continue-on-error batches. Input order is
/// preserved within and across the batches of a partition.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    bulk_max: usize,
    mixed_max: usize,
    /// Partitions smaller than this skip bulk mode even when supported;
    /// individual requests at high parallelism win for small volumes.
    efficiency_threshold: usize,
}

impl BatchPlanner {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self {
            bulk_max: cfg.bulk_max_batch_size,
            mixed_max: cfg.mixed_max_batch_size,
            efficiency_threshold: cfg.bulk_efficiency_threshold,
        }
    }

    pub fn plan(&self, pending: Vec<WorkItem>, caps: &Capabilities, batch_size: usize) -> Vec<Batch> {
        // Partition by (operation, target), preserving first-seen order.
        let mut order: Vec<(OperationKind, String)> = Vec::new();
        let mut partitions: HashMap<(OperationKind, String), Vec<WorkItem>> = HashMap::new();
        for item in pending {
            let key = (item.kind, item.target.clone());
            if !partitions.contains_key(&key) {
                order.push(key.clone());
            }
            partitions.entry(key).or_default().push(item);
        }

        let mut batches = Vec::new();
        let mut leftovers: Vec<WorkItem> = Vec::new();

        for key in order {
            let items = partitions.remove(&key).unwrap_or_default();
            let (kind, target) = key;

            let bulk_capable = caps.supports_bulk(&target, kind);
            if bulk_capable && items.len() >= self.efficiency_threshold {
                let cap = caps
                    .bulk_max_size(&target)
                    .unwrap_or(self.bulk_max)
                    .min(self.bulk_max);
                let size = batch_size.min(cap).max(1);
                for chunk in items.chunks(size) {
                    batches.push(Batch {
                        items: chunk.to_vec(),
                        mode: BatchMode::AllOrNothing,
                        kind: BatchKind::Homogeneous(kind),
                    });
                }
            } else {
                leftovers.extend(items);
            }
        }

        // Pack leftovers in original input order into continue-on-error
        // batches.
        leftovers.sort_by_key(|i| i.index);
        let size = batch_size.min(self.mixed_max).max(1);
        for chunk in leftovers.chunks(size) {
            batches.push(Batch {
                items: chunk.to_vec(),
                mode: BatchMode::ContinueOnError,
                kind: Self::chunk_kind(chunk),
            });
        }

        batches
    }

    /// Continue-on-error chunks that happen to be uniform still count as
    /// homogeneous; anything else is mixed.
    fn chunk_kind(chunk: &[WorkItem]) -> BatchKind {
        let first = &chunk[0];
        let uniform = chunk
            .iter()
            .all(|i| i.kind == first.kind && i.target == first.target);
        if uniform {
            BatchKind::Homogeneous(first.kind)
        } else {
            BatchKind::Mixed
        }
    }
}
