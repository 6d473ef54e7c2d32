//! Debounce and reconciliation bookkeeping.
//!
//! [`EditScheduler`] holds no threads and reads no clock: every call takes
//! the current [`Instant`], so the edit worker and tests drive it the same
//! way.
//!
//! - Scheduled edits are keyed by target. A newer edit for the same stream
//!   replaces the pending one.
//! - Pending edits become due once `debounce` has passed since the most
//!   recent schedule, and are then taken together as one batch.
//! - After each append, a reconciliation becomes due once `reconcile_idle`
//!   has passed without further appends.
//! - Each page carries an epoch that is bumped whenever it is edited. A
//!   [`ReconcileTicket`] snapshots the epochs at dispatch so pages edited
//!   while the re-parse ran can be told apart.

use super::incremental::{Edit, EditTarget};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Epoch snapshot taken when a reconciliation is dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileTicket {
    epochs: HashMap<usize, u64>,
}

impl ReconcileTicket {
    /// Epoch of `page` at dispatch time.
    pub fn epoch(&self, page: usize) -> u64 {
        self.epochs.get(&page).copied().unwrap_or(0)
    }
}

/// Pure debounce / supersede / reconcile state machine.
#[derive(Debug, Clone)]
pub struct EditScheduler {
    debounce: Duration,
    reconcile_idle: Duration,
    pending: IndexMap<EditTarget, Edit>,
    last_schedule: Option<Instant>,
    last_append: Option<Instant>,
    epochs: HashMap<usize, u64>,
}

impl EditScheduler {
    /// Scheduler with the given quiet periods.
    pub fn new(debounce: Duration, reconcile_idle: Duration) -> Self {
        Self {
            debounce,
            reconcile_idle,
            pending: IndexMap::new(),
            last_schedule: None,
            last_append: None,
            epochs: HashMap::new(),
        }
    }

    /// Queue `edit`. Returns true when it replaced a pending edit for the
    /// same target.
    pub fn schedule(&mut self, edit: Edit, now: Instant) -> bool {
        self.schedule_as(edit.target, edit, now)
    }

    /// Queue `edit` under `key`. Callers that can resolve slots to objects
    /// pass the resolved target so both forms of one stream share a key.
    pub fn schedule_as(&mut self, key: EditTarget, edit: Edit, now: Instant) -> bool {
        if let EditTarget::Slot { page, .. } = edit.target {
            self.touch(page);
        }
        self.last_schedule = Some(now);
        let superseded = self.pending.shift_remove(&key).is_some();
        self.pending.insert(key, edit);
        superseded
    }

    /// Drop the pending edit queued under `key`. Returns true when one was
    /// queued.
    pub fn cancel(&mut self, key: &EditTarget) -> bool {
        let removed = self.pending.shift_remove(key).is_some();
        if self.pending.is_empty() {
            self.last_schedule = None;
        }
        removed
    }

    /// Number of queued edits.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether any edit is queued.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// When the queued edits become due.
    pub fn flush_deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        self.last_schedule.map(|t| t + self.debounce)
    }

    /// Take the queued edits if the debounce window has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<Edit>> {
        match self.flush_deadline() {
            Some(deadline) if now >= deadline => Some(self.drain()),
            _ => None,
        }
    }

    /// Take every queued edit regardless of timing, oldest first.
    pub fn drain(&mut self) -> Vec<Edit> {
        self.last_schedule = None;
        self.pending.drain(..).map(|(_, edit)| edit).collect()
    }

    /// Note a completed append; restarts the idle timer.
    pub fn record_append(&mut self, now: Instant) {
        self.last_append = Some(now);
    }

    /// When a reconciliation becomes due, if an append happened since the
    /// last dispatch.
    pub fn reconcile_deadline(&self) -> Option<Instant> {
        self.last_append.map(|t| t + self.reconcile_idle)
    }

    /// Whether a reconciliation is due. Pending edits hold it back.
    pub fn reconcile_due(&self, now: Instant) -> bool {
        !self.has_pending() && self.reconcile_deadline().map_or(false, |d| now >= d)
    }

    /// Bump the epoch of `page`. Returns the new epoch.
    pub fn touch(&mut self, page: usize) -> u64 {
        let epoch = self.epochs.entry(page).or_insert(0);
        *epoch += 1;
        *epoch
    }

    /// Current epoch of `page`.
    pub fn epoch(&self, page: usize) -> u64 {
        self.epochs.get(&page).copied().unwrap_or(0)
    }

    /// Snapshot epochs for a reconciliation and clear its timer.
    pub fn dispatch_reconcile(&mut self) -> ReconcileTicket {
        self.last_append = None;
        ReconcileTicket {
            epochs: self.epochs.clone(),
        }
    }

    /// Pages edited after `ticket` was taken, in ascending order.
    pub fn touched_since(&self, ticket: &ReconcileTicket) -> Vec<usize> {
        let mut pages: Vec<usize> = self
            .epochs
            .iter()
            .filter(|(page, epoch)| **epoch != ticket.epoch(**page))
            .map(|(page, _)| *page)
            .collect();
        pages.sort_unstable();
        pages
    }
}
