//! Live sync: routes real-time events into the store and keeps it aligned
//! with REST snapshots.
//!
//! A resync runs on every `connect` (first connect and each reconnect) and
//! whenever the caller asks for one with [`LiveSync::refresh`]. User-list
//! fetches are tagged with the query generation they were issued for; a
//! response for a query that has since changed is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use freqadmin_shared::{UserPage, EVENT_CONNECT, EVENT_DISCONNECT};
use serde_json::Value;
use tokio::sync::watch;

use crate::normalizer::{normalize, SUBSCRIBED_EVENTS};
use crate::snapshot::{PageRequest, SnapshotFetcher};
use crate::stores::{PresenceUpdate, SnapshotTicket, SyncStore};
use crate::ws::{Connection, ConnectionManager, Subscription};

/// What the user list is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub page: PageRequest,
    pub search: String,
}

/// A user-list fetch in flight.
#[derive(Debug, Clone)]
struct PendingUsers {
    ticket: SnapshotTicket,
    generation: u64,
    query: UserQuery,
}

struct Inner {
    fetcher: SnapshotFetcher,
    store: SyncStore,
    query: Mutex<UserQuery>,
    generation: AtomicU64,
    users: watch::Sender<UserPage>,
}

#[derive(Clone)]
pub struct LiveSync {
    inner: Arc<Inner>,
}

impl LiveSync {
    pub fn new(fetcher: SnapshotFetcher, store: SyncStore, query: UserQuery) -> Self {
        let (users, _rx) = watch::channel(UserPage::default());
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                query: Mutex::new(query),
                generation: AtomicU64::new(0),
                users,
            }),
        }
    }

    pub fn store(&self) -> &SyncStore {
        &self.inner.store
    }

    pub fn fetcher(&self) -> &SnapshotFetcher {
        &self.inner.fetcher
    }

    /// The latest user page matching the current query.
    pub fn users(&self) -> watch::Receiver<UserPage> {
        self.inner.users.subscribe()
    }

    pub fn query(&self) -> UserQuery {
        self.inner
            .query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the user list to `query`. Fetches issued for the previous
    /// query are discarded when they complete.
    pub fn set_query(&self, query: UserQuery) {
        let mut current = self.inner.query.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == query {
            return;
        }
        *current = query;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Get the session's connection from `manager` with this sync attached
    /// before the transport starts, so the first `connect` triggers a resync.
    /// A connection the manager already held is attached as is and needs a
    /// [`LiveSync::resync`] to catch up.
    pub fn connect(
        &self,
        manager: &ConnectionManager,
        token: Option<String>,
    ) -> (Connection, Vec<Subscription>) {
        let mut subscriptions = Vec::new();
        let connection = manager.connect_with(token, |connection| {
            subscriptions = self.attach(connection);
        });
        (connection, subscriptions)
    }

    /// Register handlers for every subscribed event plus `connect` and
    /// `disconnect`. Dropping the returned subscriptions detaches.
    ///
    /// Frames that arrived before this call are not replayed. Prefer
    /// [`LiveSync::connect`] for a new connection; on one that is already
    /// running, follow up with [`LiveSync::resync`].
    pub fn attach(&self, connection: &Connection) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = SUBSCRIBED_EVENTS
            .iter()
            .map(|&event| {
                let sync = self.clone();
                connection.on(event, move |payload| {
                    sync.handle_event(event, payload);
                })
            })
            .collect();

        let sync = self.clone();
        subscriptions.push(connection.on(EVENT_CONNECT, move |_| {
            let sync = sync.clone();
            tokio::spawn(async move { sync.resync().await });
        }));
        subscriptions.push(connection.on(EVENT_DISCONNECT, |reason| {
            tracing::warn!(reason = reason.as_str().unwrap_or("unknown"), "live updates paused");
        }));

        subscriptions
    }

    /// Normalize a raw event and apply it. Returns `true` if visible state
    /// changed.
    pub fn handle_event(&self, event: &str, payload: &Value) -> bool {
        match normalize(event, payload) {
            Some(domain_event) => {
                tracing::debug!(%event, ?domain_event, "applying live event");
                self.inner.store.apply(domain_event)
            }
            None => false,
        }
    }

    /// Re-read users and dashboard counters.
    pub async fn resync(&self) {
        tracing::info!("resyncing from snapshots");
        tokio::join!(self.resync_users(), self.resync_stats());
    }

    /// Manual refresh from the rendering layer.
    pub async fn refresh(&self) {
        self.resync().await;
    }

    /// Fetch the current user page and reconcile it. Returns `false` if the
    /// result was dropped because the query changed meanwhile.
    pub async fn resync_users(&self) -> bool {
        let pending = self.begin_users();
        let page = self
            .inner
            .fetcher
            .fetch_users(pending.query.page, &pending.query.search)
            .await;
        self.finish_users(pending, page)
    }

    fn begin_users(&self) -> PendingUsers {
        // Generation first: a query switch racing with this call at worst
        // drops a result that was current.
        let generation = self.inner.generation.load(Ordering::SeqCst);
        PendingUsers {
            ticket: self.inner.store.begin_snapshot(),
            generation,
            query: self.query(),
        }
    }

    fn finish_users(&self, pending: PendingUsers, page: UserPage) -> bool {
        if self.inner.generation.load(Ordering::SeqCst) != pending.generation {
            tracing::debug!(page = pending.query.page.page(), search = %pending.query.search, "dropping users for a stale query");
            return false;
        }
        let updates: Vec<PresenceUpdate> = page.records.iter().map(PresenceUpdate::from).collect();
        let changed = self.inner.store.apply_snapshot_since(pending.ticket, &updates);
        tracing::debug!(records = updates.len(), changed, "users snapshot reconciled");
        self.inner.users.send_replace(page);
        true
    }

    /// Counters are left as they are when the snapshot fails.
    async fn resync_stats(&self) {
        match self.inner.fetcher.try_dashboard_snapshot().await {
            Ok(stats) => {
                self.inner.store.set_stats(stats);
            }
            Err(e) => tracing::warn!(error = %e, "keeping previous dashboard stats"),
        }
    }
}

impl std::fmt::Debug for LiveSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSync")
            .field("query", &self.query())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use freqadmin_shared::{DashboardStats, UserSummary};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use crate::api_client::ApiClient;
    use crate::test_support::serve_routes;

    fn sync_for(base_url: &str) -> LiveSync {
        LiveSync::new(
            SnapshotFetcher::new(ApiClient::new().with_base_url(base_url)),
            SyncStore::new(),
            UserQuery {
                page: PageRequest::first(10).unwrap(),
                search: String::new(),
            },
        )
    }

    fn page_with(id: &str, is_online: bool) -> UserPage {
        UserPage {
            records: vec![UserSummary {
                id: id.into(),
                is_online,
                ..UserSummary::default()
            }],
            total: 1,
        }
    }

    #[test]
    fn late_connect_snapshot_does_not_revert_live_events() {
        let sync = sync_for("http://127.0.0.1:1/api");

        // Resync issued at connect, response still in flight.
        let pending = sync.begin_users();

        assert!(sync.handle_event("user_status_changed", &json!({"userId": "u1", "status": "online"})));
        assert!(sync.store().read(|s| s.is_online("u1")));

        assert!(sync.handle_event("user_left_frequency", &json!({"userId": "u1"})));
        assert!(!sync.store().read(|s| s.is_online("u1")));

        assert!(sync.finish_users(pending, page_with("u1", true)));
        assert!(!sync.store().read(|s| s.is_online("u1")));
    }

    #[test]
    fn snapshot_issued_after_events_applies() {
        let sync = sync_for("http://127.0.0.1:1/api");
        sync.handle_event("user_left_frequency", &json!({"userId": "u1"}));

        let pending = sync.begin_users();
        sync.finish_users(pending, page_with("u1", true));
        assert!(sync.store().read(|s| s.is_online("u1")));
    }

    #[test]
    fn results_for_a_superseded_query_are_dropped() {
        let sync = sync_for("http://127.0.0.1:1/api");
        let pending = sync.begin_users();

        sync.set_query(UserQuery {
            page: PageRequest::new(2, 10).unwrap(),
            search: "ana".into(),
        });

        assert!(!sync.finish_users(pending, page_with("u1", true)));
        assert!(sync.store().read(|s| s.is_empty()));
        assert_eq!(*sync.users().borrow(), UserPage::default());
    }

    #[test]
    fn setting_the_same_query_keeps_fetches_current() {
        let sync = sync_for("http://127.0.0.1:1/api");
        let pending = sync.begin_users();
        sync.set_query(sync.query());
        assert!(sync.finish_users(pending, page_with("u1", true)));
    }

    #[test]
    fn malformed_events_change_nothing() {
        let sync = sync_for("http://127.0.0.1:1/api");
        assert!(!sync.handle_event("user_joined_frequency", &json!({})));
        assert!(!sync.handle_event("frequency_deleted", &json!({"id": "f1"})));
        assert!(sync.store().read(|s| s.is_empty()));
    }

    #[tokio::test]
    async fn resync_fills_users_and_stats() {
        let server = serve_routes(vec![
            ("/admin/users", 200, r#"{"success":true,"data":{"users":[{"_id":"u1","isOnline":true},{"_id":"u2","isOnline":false}],"total":2}}"#),
            ("/admin/users/stats", 200, r#"{"total":2,"dailyActive":1}"#),
            ("/admin/frequencies/active", 200, r#"[{"_id":"f1"}]"#),
            ("/admin/frequencies/private", 200, r#"[]"#),
        ])
        .await;
        let sync = sync_for(&server.base_url);

        sync.refresh().await;

        assert_eq!(sync.users().borrow().total, 2);
        sync.store().read(|s| {
            assert!(s.is_online("u1"));
            assert!(!s.is_online("u2"));
            assert_eq!(
                s.stats(),
                DashboardStats {
                    total_users: 2,
                    active_frequencies: 1,
                    private_frequencies: 0,
                    daily_active_users: 1,
                }
            );
        });
    }

    #[tokio::test]
    async fn failed_stats_snapshot_keeps_live_counters() {
        let sync = sync_for("http://127.0.0.1:1/api");
        sync.handle_event("dashboard_stats", &json!({"totalUsers": 9}));

        sync.resync().await;

        assert_eq!(sync.store().read(|s| s.stats().total_users), 9);
        assert_eq!(*sync.users().borrow(), UserPage::default());
    }

    #[tokio::test]
    async fn events_from_the_socket_reach_the_store() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .await
            .unwrap();

            let Some(Ok(Message::Text(connect))) = ws.next().await else {
                return;
            };
            let _ = auth_tx.send(connect.as_str().to_string());

            ws.send(Message::Text(r#"40{"sid":"n1"}"#.into())).await.unwrap();
            ws.send(Message::Text(
                r#"42["user_status_changed",{"userId":"u9","status":"online"}]"#.into(),
            ))
            .await
            .unwrap();

            // Hold the socket open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let sync = sync_for("http://127.0.0.1:1/api");
        let mut presence = sync.store().subscribe();
        let manager = ConnectionManager::new(&format!("http://{addr}"));
        let (connection, _subscriptions) = sync.connect(&manager, Some("t0k".into()));

        let auth = tokio::time::timeout(Duration::from_secs(5), auth_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth, r#"40{"token":"t0k"}"#);

        tokio::time::timeout(Duration::from_secs(5), presence.wait_for(|s| s.is_online("u9")))
            .await
            .unwrap()
            .unwrap();
        assert!(connection.state().is_connected());

        manager.shutdown().await;
    }
}
