//! freqadmin monitor - headless consumer of the live sync core.
//!
//! Connects to the real-time server, keeps the presence map and dashboard
//! counters reconciled, and logs what an admin dashboard would render.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use freqadmin_client::{
    countdown, ApiClient, Config, ConnectionManager, ConnectionState, LiveSync, PageRequest,
    SnapshotFetcher, Storage, SyncStore, UserQuery,
};
use freqadmin_shared::Frequency;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("freqadmin=debug,freqadmin_client=debug")),
        )
        .init();

    let config = Config::from_env().context("reading configuration")?;
    let storage = Storage::platform();

    let token = match config.token.clone() {
        Some(token) => {
            if let Some(storage) = &storage {
                storage.save_token(&token);
            }
            Some(token)
        }
        None => storage.as_ref().and_then(Storage::load_token),
    };
    if token.is_none() {
        tracing::warn!("no token configured, admin endpoints will likely refuse requests");
    }

    let api = ApiClient::new()
        .with_base_url(config.api_url.clone())
        .with_token(token.clone())
        .with_storage(storage);
    let store = SyncStore::new();
    let query = UserQuery {
        page: PageRequest::first(config.page_size)?,
        search: config.search.clone(),
    };
    let sync = LiveSync::new(SnapshotFetcher::new(api), store.clone(), query);

    let manager = ConnectionManager::new(&config.socket_url);
    let (connection, _subscriptions) = sync.connect(&manager, token);

    // The socket may be slow to come up, or never; render from REST now.
    sync.resync().await;
    let mut private = sync.fetcher().fetch_private_frequencies().await;
    let mut expired: HashSet<String> = HashSet::new();

    let mut presence = store.subscribe();
    let mut users = sync.users();
    let mut state = connection.watch_state();

    let mut refresh = interval_at(Instant::now() + config.refresh_interval, config.refresh_interval);
    let mut clock = interval(Duration::from_secs(1));
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                let (online, known, stats) = {
                    let view = presence.borrow_and_update();
                    (view.online_count(), view.len(), view.stats())
                };
                tracing::info!(
                    online,
                    known,
                    total_users = stats.total_users,
                    active_frequencies = stats.active_frequencies,
                    private_frequencies = stats.private_frequencies,
                    daily_active_users = stats.daily_active_users,
                    "dashboard"
                );
            }
            changed = users.changed() => {
                if changed.is_err() {
                    break;
                }
                let page = users.borrow_and_update().clone();
                tracing::info!(shown = page.records.len(), total = page.total, "users page");
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match &current {
                    ConnectionState::Failed { reason } => {
                        tracing::error!(%reason, "real-time updates unavailable, relying on periodic refresh");
                    }
                    other => tracing::info!(state = ?other, "connection"),
                }
            }
            _ = refresh.tick() => {
                sync.refresh().await;
                private = sync.fetcher().fetch_private_frequencies().await;
            }
            _ = clock.tick() => {
                report_countdowns(&private, &mut expired);
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Log each private frequency once when it expires, plus the next one due.
fn report_countdowns(private: &[Frequency], expired: &mut HashSet<String>) {
    let now = Utc::now();
    let mut next: Option<(&Frequency, countdown::TimeLeft)> = None;

    for frequency in private {
        let Some(expires_at) = frequency.expires_at else {
            continue;
        };
        let left = countdown::evaluate(expires_at, now);
        if left.expired {
            if expired.insert(frequency.id.clone()) {
                tracing::info!(frequency = %frequency.name, id = %frequency.id, "private frequency expired");
            }
            continue;
        }
        if next.map_or(true, |(f, _)| f.expires_at > frequency.expires_at) {
            next = Some((frequency, left));
        }
    }

    if let Some((frequency, left)) = next {
        tracing::trace!(frequency = %frequency.name, time_left = %left, "next expiry");
    }
}
