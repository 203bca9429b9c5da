//! Result aggregation and the final run report.

use crate::types::{Outcome, OutcomeStatus};
use std::time::Duration;

/// Deterministic final report of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One outcome per input item, sorted by original index.
    pub outcomes: Vec<Outcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Items that succeeded only after at least one retry.
    pub retried: usize,
    pub skipped: usize,
    /// Transport calls issued over the whole run (including retries).
    pub transport_calls: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Accumulates per-item outcomes and produces the ordered final report.
///
/// `record` is idempotent per index with last-write-wins semantics: an item
/// may be touched by several attempts, and only its final resolution matters.
pub struct ResultAggregator {
    slots: Vec<Option<Outcome>>,
    transport_calls: usize,
}

impl ResultAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            slots: (0..total).map(|_| None).collect(),
            transport_calls: 0,
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        let index = outcome.index;
        debug_assert!(index < self.slots.len(), "outcome index out of range");
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(outcome);
        }
    }

    pub fn note_transport_call(&mut self) {
        self.transport_calls += 1;
    }

    /// Items that have reached a final resolution so far.
    pub fn resolved(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.slots.get(index).map(|s| s.is_some()).unwrap_or(false)
    }

    /// Produce the final report. Unresolved items become `Skipped`, so the
    /// report always carries exactly one outcome per input item.
    pub fn finalize(self, elapsed: Duration) -> RunReport {
        let outcomes: Vec<Outcome> = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| Outcome::skipped(index)))
            .collect();

        let mut succeeded = 0;
        let mut failed = 0;
        let mut retried = 0;
        let mut skipped = 0;
        for o in &outcomes {
            match &o.status {
                OutcomeStatus::Succeeded => succeeded += 1,
                OutcomeStatus::Retried(_) => {
                    succeeded += 1;
                    retried += 1;
                }
                OutcomeStatus::Failed(_) => failed += 1,
                OutcomeStatus::Skipped => skipped += 1,
            }
        }

        RunReport {
            outcomes,
            succeeded,
            failed,
            retried,
            skipped,
            transport_calls: self.transport_calls,
            elapsed,
        }
    }
}
