//! freqadmin client - real-time sync core for the admin dashboard.
//!
//! This crate keeps a local, observable view of user presence and dashboard
//! counters consistent with the backend by combining a Socket.IO event
//! stream with REST snapshots.

pub mod api_client;
pub mod config;
pub mod countdown;
pub mod error;
pub mod normalizer;
pub mod snapshot;
pub mod storage;
pub mod stores;
pub mod sync;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use api_client::ApiClient;
pub use config::Config;
pub use countdown::TimeLeft;
pub use error::{ClientError, Result};
pub use normalizer::DomainEvent;
pub use snapshot::{DateRange, PageRequest, SnapshotFetcher};
pub use storage::Storage;
pub use stores::{PresenceReconciler, PresenceRecord, SyncStore};
pub use sync::{LiveSync, UserQuery};
pub use ws::{Connection, ConnectionManager, ConnectionState, Subscription};
