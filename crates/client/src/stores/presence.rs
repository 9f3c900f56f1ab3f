//! Presence reconciler: the authoritative local view of who is online and
//! of the dashboard counters.
//!
//! Live events and REST snapshots race each other. Every write is stamped
//! with a revision from one counter: an event takes its revision when it is
//! applied, a snapshot takes it when the fetch is issued
//! ([`PresenceReconciler::begin_snapshot`]). A write only lands on a key
//! whose last write has a lower revision, so a snapshot that was in flight
//! while an event arrived never reverts that event.
//!
//! Snapshots upsert; they never remove users missing from them, since a
//! paged or filtered snapshot is not a complete view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use freqadmin_shared::{DashboardStats, UserSummary};

use crate::normalizer::DomainEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub is_online: bool,
    /// Never moves backwards for a given user.
    pub last_updated_at: DateTime<Utc>,
}

/// One entry of an authoritative snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub user_id: String,
    pub is_online: bool,
}

impl From<&UserSummary> for PresenceUpdate {
    fn from(user: &UserSummary) -> Self {
        Self {
            user_id: user.id.clone(),
            is_online: user.is_online,
        }
    }
}

/// Issued when a snapshot fetch starts; redeemed when its result arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotTicket {
    revision: u64,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    record: PresenceRecord,
    revision: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceReconciler {
    entries: HashMap<String, Entry>,
    stats: DashboardStats,
    revision: u64,
}

impl PresenceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Apply a live event. Returns `true` if visible state changed.
    pub fn apply(&mut self, event: DomainEvent) -> bool {
        self.apply_at(event, Utc::now())
    }

    pub fn apply_at(&mut self, event: DomainEvent, now: DateTime<Utc>) -> bool {
        match event {
            DomainEvent::UserOnline { user_id } => {
                let revision = self.next_revision();
                self.write(&user_id, true, revision, now)
            }
            DomainEvent::UserOffline { user_id } => {
                let revision = self.next_revision();
                self.write(&user_id, false, revision, now)
            }
            DomainEvent::DashboardStatsUpdated(stats) => self.set_stats(stats),
        }
    }

    /// Overwrite the dashboard counters. Last writer by arrival wins.
    pub fn set_stats(&mut self, stats: DashboardStats) -> bool {
        if self.stats == stats {
            return false;
        }
        self.stats = stats;
        true
    }

    pub fn begin_snapshot(&mut self) -> SnapshotTicket {
        self.begin_snapshot_at(Utc::now())
    }

    pub fn begin_snapshot_at(&mut self, now: DateTime<Utc>) -> SnapshotTicket {
        SnapshotTicket {
            revision: self.next_revision(),
            issued_at: now,
        }
    }

    /// Apply a snapshot observed just now. Returns how many records changed.
    pub fn apply_snapshot(&mut self, records: &[PresenceUpdate]) -> usize {
        let ticket = self.begin_snapshot();
        self.apply_snapshot_since(ticket, records)
    }

    /// Apply a snapshot fetched under `ticket`. Users written after the
    /// ticket was issued keep their newer state. Returns how many records
    /// changed.
    pub fn apply_snapshot_since(&mut self, ticket: SnapshotTicket, records: &[PresenceUpdate]) -> usize {
        let mut changed = 0;
        let mut skipped = 0;
        for update in records {
            let newer = self
                .entries
                .get(&update.user_id)
                .is_some_and(|entry| entry.revision > ticket.revision);
            if newer {
                skipped += 1;
                continue;
            }
            if self.write(&update.user_id, update.is_online, ticket.revision, ticket.issued_at) {
                changed += 1;
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "snapshot entries older than live events were skipped");
        }
        changed
    }

    fn write(&mut self, user_id: &str, is_online: bool, revision: u64, at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(user_id) {
            Some(entry) => {
                if revision < entry.revision {
                    return false;
                }
                entry.revision = revision;
                if entry.record.is_online == is_online {
                    return false;
                }
                entry.record.is_online = is_online;
                entry.record.last_updated_at = entry.record.last_updated_at.max(at);
                true
            }
            None => {
                self.entries.insert(
                    user_id.to_string(),
                    Entry {
                        record: PresenceRecord {
                            user_id: user_id.to_string(),
                            is_online,
                            last_updated_at: at,
                        },
                        revision,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.entries.get(user_id).map(|entry| &entry.record)
    }

    /// Unknown users count as offline.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.get(user_id).is_some_and(|record| record.is_online)
    }

    pub fn records(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.entries.values().map(|entry| &entry.record)
    }

    pub fn online_count(&self) -> usize {
        self.records().filter(|record| record.is_online).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> DashboardStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn online(id: &str) -> DomainEvent {
        DomainEvent::UserOnline { user_id: id.into() }
    }

    fn offline(id: &str) -> DomainEvent {
        DomainEvent::UserOffline { user_id: id.into() }
    }

    fn update(id: &str, is_online: bool) -> PresenceUpdate {
        PresenceUpdate {
            user_id: id.into(),
            is_online,
        }
    }

    #[test]
    fn duplicate_online_event_is_idempotent() {
        let t0 = Utc::now();
        let mut once = PresenceReconciler::new();
        once.apply_at(online("u1"), t0);

        let mut twice = PresenceReconciler::new();
        assert!(twice.apply_at(online("u1"), t0));
        assert!(!twice.apply_at(online("u1"), t0 + Duration::seconds(1)));

        assert_eq!(once.get("u1"), twice.get("u1"));
    }

    #[test]
    fn event_after_snapshot_wins() {
        let mut presence = PresenceReconciler::new();
        presence.apply_snapshot(&[update("u1", false)]);
        presence.apply(online("u1"));
        assert!(presence.is_online("u1"));
    }

    #[test]
    fn snapshot_is_additive() {
        let mut presence = PresenceReconciler::new();
        presence.apply(online("u2"));
        let before = presence.get("u2").cloned();

        presence.apply_snapshot(&[update("u1", true)]);

        assert_eq!(presence.get("u2").cloned(), before);
        assert!(presence.is_online("u1"));
        assert_eq!(presence.len(), 2);
    }

    #[test]
    fn in_flight_snapshot_does_not_revert_newer_event() {
        let mut presence = PresenceReconciler::new();
        presence.apply(online("u1"));

        let ticket = presence.begin_snapshot();
        presence.apply(offline("u1"));
        let changed = presence.apply_snapshot_since(ticket, &[update("u1", true), update("u5", true)]);

        assert_eq!(changed, 1);
        assert!(!presence.is_online("u1"));
        assert!(presence.is_online("u5"));
    }

    #[test]
    fn snapshot_issued_after_event_overrides_it() {
        let mut presence = PresenceReconciler::new();
        presence.apply(offline("u1"));
        let ticket = presence.begin_snapshot();
        assert_eq!(presence.apply_snapshot_since(ticket, &[update("u1", true)]), 1);
        assert!(presence.is_online("u1"));
    }

    #[test]
    fn last_updated_at_never_moves_backwards() {
        let t0 = Utc::now();
        let mut presence = PresenceReconciler::new();
        presence.apply_at(online("u1"), t0);

        // A snapshot stamped earlier than the held record but issued later.
        let ticket = presence.begin_snapshot_at(t0 - Duration::seconds(30));
        presence.apply_snapshot_since(ticket, &[update("u1", false)]);

        let record = presence.get("u1").unwrap();
        assert!(!record.is_online);
        assert_eq!(record.last_updated_at, t0);
    }

    #[test]
    fn stats_are_overwritten_whole() {
        let mut presence = PresenceReconciler::new();
        let first = DashboardStats {
            total_users: 10,
            active_frequencies: 2,
            private_frequencies: 1,
            daily_active_users: 5,
        };
        assert!(presence.apply(DomainEvent::DashboardStatsUpdated(first)));
        assert!(!presence.apply(DomainEvent::DashboardStatsUpdated(first)));

        let second = DashboardStats {
            total_users: 11,
            ..DashboardStats::default()
        };
        presence.set_stats(second);
        assert_eq!(presence.stats(), second);
    }

    #[test]
    fn counts_online_users() {
        let mut presence = PresenceReconciler::new();
        presence.apply(online("a"));
        presence.apply(online("b"));
        presence.apply(offline("c"));
        assert_eq!(presence.online_count(), 2);
        assert!(!presence.is_online("nobody"));
    }
}
