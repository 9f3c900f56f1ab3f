//! Transport loop using tokio-tungstenite.
//!
//! One task per [`Connection`](super::Connection). It owns the socket and
//! the retry/backoff policy; nothing above it reconnects manually.

use std::sync::Arc;
use std::time::Duration;

use freqadmin_shared::{
    EnginePacket, SocketPacket, DEFAULT_NAMESPACE, EVENT_CONNECT, EVENT_DISCONNECT,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ConnectionState, HandlerRegistry, ReconnectConfig};

/// Silence tolerated before the server's handshake says otherwise
/// (Engine.IO default `pingInterval` + `pingTimeout`).
const DEFAULT_SILENCE: Duration = Duration::from_millis(25_000 + 20_000);

/// How one socket session ended.
enum SessionEnd {
    /// Shutdown was requested; stop for good.
    Shutdown,
    /// The socket closed or the server refused us.
    Closed { joined: bool, reason: String },
}

pub(super) async fn run(
    url: String,
    token: Option<String>,
    reconnect_config: ReconnectConfig,
    registry: Arc<HandlerRegistry>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        if attempt == 0 {
            state.send_replace(ConnectionState::Connecting);
        } else {
            state.send_replace(ConnectionState::Reconnecting { attempt });
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            result = connect_async(url.as_str()) => result,
        };

        let failure = match connected {
            Ok((ws_stream, _response)) => {
                tracing::debug!(%url, "socket open, waiting for handshake");
                match run_session(ws_stream, token.as_deref(), &registry, &state, &mut shutdown)
                    .await
                {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Closed { joined: true, reason } => {
                        tracing::info!(%url, %reason, "real-time connection lost");
                        state.send_replace(ConnectionState::Disconnected);
                        registry.dispatch(EVENT_DISCONNECT, &Value::String(reason));
                        // A session that got as far as joining resets the budget.
                        attempt = 0;
                        None
                    }
                    SessionEnd::Closed { joined: false, reason } => Some(reason),
                }
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = &failure {
            tracing::error!(%url, error = %reason, "real-time connection failed");

            if reconnect_config.max_attempts > 0 && attempt >= reconnect_config.max_attempts {
                state.send_replace(ConnectionState::Failed {
                    reason: format!(
                        "Max reconnect attempts ({}) exceeded",
                        reconnect_config.max_attempts
                    ),
                });
                break;
            }
        }

        let delay = reconnect_config.delay_for_attempt(attempt);
        tracing::info!(%url, delay_ms = delay, attempt = attempt + 1, "reconnecting");
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(delay as u64)) => {}
        }
        if failure.is_some() {
            attempt += 1;
        }
    }

    if !matches!(*state.borrow(), ConnectionState::Failed { .. }) {
        state.send_replace(ConnectionState::Disconnected);
    }
    tracing::debug!(%url, "transport task stopped");
}

async fn run_session<S>(
    ws_stream: S,
    token: Option<&str>,
    registry: &HandlerRegistry,
    state: &watch::Sender<ConnectionState>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let mut joined = false;

    // The server pings every `pingInterval`; nothing for longer than
    // `pingInterval + pingTimeout` means the peer is gone.
    let mut max_silence = DEFAULT_SILENCE;
    let silence = tokio::time::sleep(max_silence);
    tokio::pin!(silence);

    loop {
        let frame = tokio::select! {
            _ = &mut silence => {
                tracing::warn!(silence_ms = max_silence.as_millis() as u64, "no frames from server, dropping socket");
                let _ = write.close().await;
                return SessionEnd::Closed {
                    joined,
                    reason: "ping timeout".to_string(),
                };
            }
            _ = shutdown.changed() => {
                let bye = EnginePacket::Message(SocketPacket::Disconnect {
                    namespace: DEFAULT_NAMESPACE.to_string(),
                });
                let _ = write.send(Message::Text(bye.encode().into())).await;
                let _ = write.close().await;
                return SessionEnd::Shutdown;
            }
            frame = read.next() => frame,
        };
        silence.as_mut().reset(Instant::now() + max_silence);

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) => {
                return SessionEnd::Closed {
                    joined,
                    reason: "close frame".to_string(),
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return SessionEnd::Closed {
                    joined,
                    reason: e.to_string(),
                }
            }
            None => {
                return SessionEnd::Closed {
                    joined,
                    reason: "stream ended".to_string(),
                }
            }
        };

        let packet = match EnginePacket::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, frame = %text.as_str(), "dropping malformed frame");
                continue;
            }
        };

        let reply = match packet {
            EnginePacket::Open(handshake) => {
                tracing::debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "engine open");
                let limit = handshake.ping_interval + handshake.ping_timeout;
                if limit > 0 {
                    max_silence = Duration::from_millis(limit);
                    silence.as_mut().reset(Instant::now() + max_silence);
                }
                let auth = token.map(|t| json!({ "token": t }));
                Some(EnginePacket::Message(SocketPacket::connect(auth)))
            }
            EnginePacket::Ping(data) => Some(EnginePacket::Pong(data)),
            EnginePacket::Message(SocketPacket::Connect { .. }) => {
                joined = true;
                state.send_replace(ConnectionState::Connected);
                tracing::info!("real-time connection established");
                registry.dispatch(EVENT_CONNECT, &Value::Null);
                None
            }
            EnginePacket::Message(SocketPacket::Event { namespace, name, .. })
                if namespace != DEFAULT_NAMESPACE =>
            {
                tracing::debug!(%namespace, event = %name, "dropping event for a namespace we never joined");
                None
            }
            EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                if registry.is_subscribed(&name) {
                    let payload = args.into_iter().next().unwrap_or(Value::Null);
                    registry.dispatch(&name, &payload);
                } else {
                    tracing::debug!(event = %name, "no handler for event");
                }
                None
            }
            EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                let reason = data
                    .as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string();
                return SessionEnd::Closed { joined, reason };
            }
            EnginePacket::Message(SocketPacket::Disconnect { .. }) | EnginePacket::Close => {
                return SessionEnd::Closed {
                    joined,
                    reason: "server disconnect".to_string(),
                };
            }
            _ => None,
        };

        if let Some(reply) = reply {
            if let Err(e) = write.send(Message::Text(reply.encode().into())).await {
                return SessionEnd::Closed {
                    joined,
                    reason: format!("send failed: {e}"),
                };
            }
        }
    }
}
