//! Shared, observable client state.
//!
//! [`SyncStore`] is the only writer of the reconciled presence map and
//! dashboard counters. Readers subscribe and get a read-only view that is
//! republished on every visible change.

pub mod presence;

use std::sync::Arc;

use freqadmin_shared::DashboardStats;
use tokio::sync::watch;

use crate::normalizer::DomainEvent;

pub use presence::{PresenceReconciler, PresenceRecord, PresenceUpdate, SnapshotTicket};

#[derive(Debug, Clone)]
pub struct SyncStore {
    tx: Arc<watch::Sender<PresenceReconciler>>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PresenceReconciler::new());
        Self { tx: Arc::new(tx) }
    }

    /// Read-only view for the rendering layer.
    pub fn subscribe(&self) -> watch::Receiver<PresenceReconciler> {
        self.tx.subscribe()
    }

    /// Run `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&PresenceReconciler) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn apply(&self, event: DomainEvent) -> bool {
        self.tx.send_if_modified(|state| state.apply(event))
    }

    pub fn set_stats(&self, stats: DashboardStats) -> bool {
        self.tx.send_if_modified(|state| state.set_stats(stats))
    }

    pub fn begin_snapshot(&self) -> SnapshotTicket {
        let mut ticket = SnapshotTicket::default();
        // Issuing a ticket changes nothing visible, so readers are not woken.
        self.tx.send_if_modified(|state| {
            ticket = state.begin_snapshot();
            false
        });
        ticket
    }

    pub fn apply_snapshot_since(&self, ticket: SnapshotTicket, records: &[PresenceUpdate]) -> usize {
        let mut changed = 0;
        self.tx.send_if_modified(|state| {
            changed = state.apply_snapshot_since(ticket, records);
            changed > 0
        });
        changed
    }
}
