//! Derived statistics over an entity collection.
//!
//! Stats are a pure snapshot: never persisted, recomputed after every fetch
//! and every collection mutation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::{parse_due_date, Entity, Priority};
use crate::reconcile::ProgressStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedStats<S: Ord> {
    pub total: usize,
    /// Every status variant, zero counts included.
    pub by_status: BTreeMap<S, usize>,
    /// Every priority variant, zero counts included.
    pub by_priority: BTreeMap<Priority, usize>,
    /// Past-due and not completed; only tracked for tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overdue: Option<usize>,
}

impl<S: ProgressStatus> DerivedStats<S> {
    /// Stats for an empty collection.
    pub fn zeroed(track_overdue: bool) -> Self {
        Self {
            total: 0,
            by_status: S::ALL.iter().map(|status| (*status, 0)).collect(),
            by_priority: Priority::ALL.iter().map(|priority| (*priority, 0)).collect(),
            overdue: track_overdue.then_some(0),
        }
    }

    pub fn status_count(&self, status: S) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn priority_count(&self, priority: Priority) -> usize {
        self.by_priority.get(&priority).copied().unwrap_or(0)
    }

    pub fn completed(&self) -> usize {
        self.status_count(S::COMPLETED)
    }
}

/// Single pass over the collection.
pub fn compute_stats<E: Entity>(collection: &[E], now: DateTime<Utc>) -> DerivedStats<E::Status> {
    let mut stats = DerivedStats::zeroed(E::TRACKS_OVERDUE);
    stats.total = collection.len();
    for entity in collection {
        *stats.by_status.entry(entity.status()).or_insert(0) += 1;
        *stats.by_priority.entry(entity.priority()).or_insert(0) += 1;
        if let Some(overdue) = stats.overdue.as_mut() {
            if is_overdue(entity, now) {
                *overdue += 1;
            }
        }
    }
    stats
}

/// `due_date < now` and not Completed. Unparsable dates are never overdue.
pub fn is_overdue<E: Entity>(entity: &E, now: DateTime<Utc>) -> bool {
    if entity.status() == E::Status::COMPLETED {
        return false;
    }
    entity
        .due_date()
        .and_then(parse_due_date)
        .is_some_and(|due| due < now)
}
