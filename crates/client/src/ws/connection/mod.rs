//! Real-time connection with state management and auto-reconnect.
//!
//! This module provides the shared types; the transport loop lives in
//! `connection_native`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

mod connection_native;

/// Connection state for the real-time stream
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }
}

/// Callback invoked with the first argument of a server event.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handlers keyed by event name.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<(Uuid, EventHandler)>>>,
}

impl HandlerRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(Uuid, EventHandler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, event: &str, handler: EventHandler) -> Uuid {
        let id = Uuid::new_v4();
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, event: &str, id: Uuid) {
        let mut handlers = self.lock();
        if let Some(list) = handlers.get_mut(event) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(event);
            }
        }
    }

    fn remove_all(&self, event: &str) -> usize {
        self.lock().remove(event).map(|list| list.len()).unwrap_or(0)
    }

    pub(crate) fn is_subscribed(&self, event: &str) -> bool {
        self.lock().contains_key(event)
    }

    /// Invoke every handler for `event`, in registration order. Returns how
    /// many ran.
    pub(crate) fn dispatch(&self, event: &str, payload: &Value) -> usize {
        // Handlers run outside the lock so they may (un)subscribe.
        let handlers: Vec<EventHandler> = self
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}

/// Registration of one handler. Dropping it removes the handler.
#[must_use = "the handler is removed when the subscription is dropped"]
pub struct Subscription {
    id: Uuid,
    event: String,
    registry: Weak<HandlerRegistry>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the handler now.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

struct ConnectionInner {
    url: String,
    registry: Arc<HandlerRegistry>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A managed real-time connection. Cheap to clone; all clones share the
/// same transport task and handlers.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Spawn the transport task for `url`. `setup` runs first, so handlers it
    /// registers see every frame including the first `connect`. Must be
    /// called inside a tokio runtime.
    pub(crate) fn open(
        url: String,
        token: Option<String>,
        reconnect: ReconnectConfig,
        setup: impl FnOnce(&Connection),
    ) -> Self {
        let registry = Arc::new(HandlerRegistry::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                url: url.clone(),
                registry: registry.clone(),
                state: state_rx,
                shutdown: shutdown_tx,
                task: Mutex::new(None),
            }),
        };
        setup(&connection);

        let task = tokio::spawn(connection_native::run(
            url,
            token,
            reconnect,
            registry,
            state_tx,
            shutdown_rx,
        ));
        *connection
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        connection
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Register a handler for a server event (or `connect` / `disconnect`).
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.registry.insert(event, Arc::new(handler));
        Subscription {
            id,
            event: event.to_string(),
            registry: Arc::downgrade(&self.inner.registry),
        }
    }

    /// Remove every handler registered for `event`. Returns how many were
    /// removed.
    pub fn off(&self, event: &str) -> usize {
        self.inner.registry.remove_all(event)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Whether the transport task is still running (connected or retrying).
    pub fn is_open(&self) -> bool {
        let running = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        running && !matches!(self.state(), ConnectionState::Failed { .. })
    }

    /// Stop the transport task. Handlers stay registered but never fire again.
    pub(crate) fn close(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Wait for the transport task to finish after `close`.
    pub(crate) async fn join(&self) {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}
