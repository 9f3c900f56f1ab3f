//! Connection manager: owns the session's single real-time connection.

use std::sync::{Mutex, PoisonError};

use freqadmin_shared::socket_url;

use super::connection::{Connection, ReconnectConfig};

/// Hands out the one real-time connection of a session.
///
/// `connect` is idempotent while a connection is held; `disconnect` tears it
/// down so the next `connect` starts a fresh one. Construct one per session
/// and pass it to whatever needs the stream.
#[derive(Debug)]
pub struct ConnectionManager {
    url: String,
    reconnect_config: ReconnectConfig,
    current: Mutex<Option<Connection>>,
}

impl ConnectionManager {
    /// `base_url` is the server's HTTP(S) base; the Socket.IO path is added.
    pub fn new(base_url: &str) -> Self {
        Self {
            url: socket_url(base_url),
            reconnect_config: ReconnectConfig::default(),
            current: Mutex::new(None),
        }
    }

    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Return the held connection, or open one authenticated with `token`.
    ///
    /// A held connection whose transport gave up is replaced.
    pub fn connect(&self, token: Option<String>) -> Connection {
        self.connect_with(token, |_| {})
    }

    /// Like [`ConnectionManager::connect`], running `setup` on the connection
    /// before its transport starts. On a connection that is already running,
    /// `setup` runs immediately. `setup` must not call back into the manager.
    pub fn connect_with(&self, token: Option<String>, setup: impl FnOnce(&Connection)) -> Connection {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(connection) = current.as_ref() {
            if connection.is_open() {
                setup(connection);
                return connection.clone();
            }
            tracing::info!(url = %self.url, "previous connection is closed, opening a new one");
        }

        tracing::info!(url = %self.url, authenticated = token.is_some(), "opening real-time connection");
        let connection =
            Connection::open(self.url.clone(), token, self.reconnect_config.clone(), setup);
        *current = Some(connection.clone());
        connection
    }

    /// The held connection, if any.
    pub fn current(&self) -> Option<Connection> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the held connection and forget it. Returns the stopped
    /// connection so callers can wait for it with [`ConnectionManager::shutdown`].
    pub fn disconnect(&self) -> Option<Connection> {
        let connection = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = &connection {
            tracing::info!(url = %connection.url(), "closing real-time connection");
            connection.close();
        }
        connection
    }

    /// `disconnect` and wait until the transport task has stopped.
    pub async fn shutdown(&self) {
        if let Some(connection) = self.disconnect() {
            connection.join().await;
        }
    }
}
