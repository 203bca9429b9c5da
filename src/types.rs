//! Core data model: work items, planned batches, and per-item outcomes.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Logical operation to perform against the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Upsert,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Upsert => "upsert",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One logical operation supplied by the caller.
///
/// Immutable once created; `index` is the ordinal position in the caller's
/// input and the stable identity used for result correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub index: usize,
    pub kind: OperationKind,
    /// Logical entity/table name the operation targets.
    pub target: String,
    /// Opaque record data, passed through to the transport untouched.
    pub payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(
        index: usize,
        kind: OperationKind,
        target: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            index,
            kind,
            target: target.into(),
            payload,
        }
    }
}

/// Failure semantics of a planned batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Any single item failure voids the entire batch.
    AllOrNothing,
    /// Items succeed or fail independently.
    ContinueOnError,
}

/// Composition of a planned batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    /// Single operation kind against a single target.
    Homogeneous(OperationKind),
    /// Heterogeneous operations; only valid with [`BatchMode::ContinueOnError`].
    Mixed,
}

/// An ordered, non-empty group of work items executed as one request.
///
/// Batches are created per scheduling round and discarded after execution.
#[derive(Debug, Clone)]
pub struct Batch {
    pub items: Vec<WorkItem>,
    pub mode: BatchMode,
    pub kind: BatchKind,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original input indexes carried by this batch, in batch order.
    pub fn item_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().map(|i| i.index)
    }
}

/// Final resolution of one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    /// Succeeded on the first attempt.
    Succeeded,
    /// Succeeded after `n` retries.
    Retried(u32),
    /// Gave up; the reason is mirrored in `Outcome::last_error`.
    Failed(String),
    /// Run ended (cancellation or fail-fast) before this item resolved.
    Skipped,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded | OutcomeStatus::Retried(_))
    }
}

/// One outcome per work item at the end of a run.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub index: usize,
    pub status: OutcomeStatus,
    /// Transport attempts that touched this item (including the final one).
    pub attempts: u32,
    pub last_error: Option<Error>,
}

impl Outcome {
    pub fn succeeded(index: usize, attempts: u32) -> Self {
        let status = if attempts > 1 {
            OutcomeStatus::Retried(attempts - 1)
        } else {
            OutcomeStatus::Succeeded
        };
        Self {
            index,
            status,
            attempts,
            last_error: None,
        }
    }

    pub fn failed(index: usize, attempts: u32, error: Error) -> Self {
        Self {
            index,
            status: OutcomeStatus::Failed(error.to_string()),
            attempts,
            last_error: Some(error),
        }
    }

    pub fn skipped(index: usize) -> Self {
        Self {
            index,
            status: OutcomeStatus::Skipped,
            attempts: 0,
            last_error: None,
        }
    }

    /// Skipped because the run was cancelled before the item resolved.
    pub fn cancelled(index: usize) -> Self {
        Self {
            index,
            status: OutcomeStatus::Skipped,
            attempts: 0,
            last_error: Some(Error::Cancelled),
        }
    }
}
