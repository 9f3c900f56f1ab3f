//! Real-time module: the session's Socket.IO connection.
//!
//! This module provides:
//! - A connection manager handing out one connection per session
//! - A transport task with auto-reconnect and backoff
//! - Named-event subscriptions released by dropping their handle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │      (connect / disconnect, one held Connection)    │
//! └─────────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//!                 ┌──────────────┐
//!                 │  Connection  │── transport task (socket, ping/pong,
//!                 └──────────────┘   reconnect with backoff)
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │Subscription│ │Subscription│ │Subscription│
//!   │ ("connect")│ │("dashboard │ │ ("user_... │
//!   │            │ │  _stats")  │ │  ")        │
//!   └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new("http://100.31.177.152");
//! let connection = manager.connect(Some(token));
//! let _sub = connection.on("dashboard_stats", |payload| {
//!     tracing::info!(?payload, "stats");
//! });
//! // ...
//! manager.disconnect();
//! ```

mod connection;
mod manager;

pub use connection::{
    Connection, ConnectionState, EventHandler, ReconnectConfig, Subscription,
};
pub use manager::ConnectionManager;
