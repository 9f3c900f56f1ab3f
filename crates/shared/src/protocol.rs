//! Real-time wire protocol.
//!
//! The admin event stream is served by a Socket.IO v4 server. Over its
//! WebSocket transport every text frame is one Engine.IO packet, and
//! Engine.IO `message` packets carry one Socket.IO packet:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,..}   engine open
//! 2 / 3                                   engine ping / pong
//! 40{"token":".."}                        socket connect (default namespace)
//! 42["user_status_changed",{..}]          socket event
//! 44{"message":"invalid token"}           socket connect error
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Socket.IO namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Event names the admin client subscribes to.
pub const EVENT_DASHBOARD_STATS: &str = "dashboard_stats";
pub const EVENT_USER_STATUS_CHANGED: &str = "user_status_changed";
pub const EVENT_USER_LEFT_FREQUENCY: &str = "user_left_frequency";
pub const EVENT_USER_JOINED_FREQUENCY: &str = "user_joined_frequency";

/// Pseudo-events raised by the transport itself.
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

/// One Engine.IO packet (one WebSocket text frame).
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// One Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: Option<u64>,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Namespace connect request, carrying the auth payload if any.
    pub fn connect(auth: Option<Value>) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: auth,
        }
    }

    fn type_char(&self) -> char {
        match self {
            SocketPacket::Connect { .. } => '0',
            SocketPacket::Disconnect { .. } => '1',
            SocketPacket::Event { .. } => '2',
            SocketPacket::Ack { .. } => '3',
            SocketPacket::ConnectError { .. } => '4',
        }
    }

    fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }
}

impl EnginePacket {
    /// Decode a single text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(rest.to_string())),
            '3' => Ok(EnginePacket::Pong(rest.to_string())),
            '4' => Ok(EnginePacket::Message(decode_socket_packet(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// Encode as a single text frame.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                // Serializing a plain struct of strings and integers cannot fail.
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(packet) => format!("4{}", encode_socket_packet(packet)),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

fn decode_socket_packet(input: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = input.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let mut rest = chars.as_str();

    if matches!(kind, '5' | '6') {
        return Err(ProtocolError::Binary);
    }

    let namespace = if rest.starts_with('/') {
        match rest.find(',') {
            Some(end) => {
                let ns = &rest[..end];
                rest = &rest[end + 1..];
                ns.to_string()
            }
            None => {
                let ns = rest;
                rest = "";
                ns.to_string()
            }
        }
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        let raw = &rest[..digits];
        Some(
            raw.parse::<u64>()
                .map_err(|_| ProtocolError::InvalidAckId(raw.to_string()))?,
        )
    } else {
        None
    };
    rest = &rest[digits..];

    let data: Option<Value> = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest)?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace, data }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut args = match data {
                Some(Value::Array(items)) => items,
                _ => return Err(ProtocolError::MissingEventName),
            };
            if args.is_empty() {
                return Err(ProtocolError::MissingEventName);
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(ProtocolError::MissingEventName),
            };
            Ok(SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            })
        }
        '3' => {
            let args = match data {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            Ok(SocketPacket::Ack {
                namespace,
                id,
                args,
            })
        }
        '4' => Ok(SocketPacket::ConnectError { namespace, data }),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

fn encode_socket_packet(packet: &SocketPacket) -> String {
    let mut out = String::new();
    out.push(packet.type_char());

    let namespace = packet.namespace();
    let has_body = !matches!(
        packet,
        SocketPacket::Disconnect { .. }
            | SocketPacket::Connect { data: None, .. }
            | SocketPacket::ConnectError { data: None, .. }
    );
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        if has_body {
            out.push(',');
        }
    }

    match packet {
        SocketPacket::Connect { data, .. } | SocketPacket::ConnectError { data, .. } => {
            if let Some(data) = data {
                out.push_str(&data.to_string());
            }
        }
        SocketPacket::Disconnect { .. } => {}
        SocketPacket::Event { id, name, args, .. } => {
            if let Some(id) = id {
                out.push_str(&id.to_string());
            }
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            out.push_str(&Value::Array(items).to_string());
        }
        SocketPacket::Ack { id, args, .. } => {
            if let Some(id) = id {
                out.push_str(&id.to_string());
            }
            out.push_str(&Value::Array(args.clone()).to_string());
        }
    }

    out
}

/// Build the WebSocket URL for a Socket.IO server base URL.
///
/// `http://host` becomes `ws://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    format!("{base}/socket.io/?EIO=4&transport=websocket")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25000);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn decodes_event_with_payload() {
        let frame = r#"42["user_status_changed",{"userId":"u1","status":"online"}]"#;
        let packet = EnginePacket::decode(frame).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/".into(),
                id: None,
                name: "user_status_changed".into(),
                args: vec![json!({"userId": "u1", "status": "online"})],
            })
        );
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let frame = r#"42/admin,7["dashboard_stats",{"totalUsers":3}]"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Message(SocketPacket::Event {
                namespace, id, name, ..
            }) => {
                assert_eq!(namespace, "/admin");
                assert_eq!(id, Some(7));
                assert_eq!(name, "dashboard_stats");
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn rejects_event_without_name() {
        assert_eq!(
            EnginePacket::decode("42[]"),
            Err(ProtocolError::MissingEventName)
        );
        assert_eq!(
            EnginePacket::decode("42[5]"),
            Err(ProtocolError::MissingEventName)
        );
    }

    #[test]
    fn rejects_binary_and_unknown_packets() {
        assert_eq!(
            EnginePacket::decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::Binary)
        );
        assert_eq!(EnginePacket::decode("9"), Err(ProtocolError::UnknownType('9')));
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
    }

    #[test]
    fn ping_is_answered_with_matching_pong() {
        let ping = EnginePacket::decode("2abc").unwrap();
        let EnginePacket::Ping(data) = ping else {
            panic!("expected ping");
        };
        assert_eq!(EnginePacket::Pong(data).encode(), "3abc");
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
    }

    #[test]
    fn encodes_connect_with_auth() {
        let packet = EnginePacket::Message(SocketPacket::connect(Some(json!({"token": "t0k"}))));
        assert_eq!(packet.encode(), r#"40{"token":"t0k"}"#);
        assert_eq!(EnginePacket::Message(SocketPacket::connect(None)).encode(), "40");
    }

    #[test]
    fn encodes_event_in_namespace() {
        let packet = EnginePacket::Message(SocketPacket::Event {
            namespace: "/admin".into(),
            id: Some(3),
            name: "ping_admin".into(),
            args: vec![json!(1)],
        });
        assert_eq!(packet.encode(), r#"42/admin,3["ping_admin",1]"#);
    }

    #[test]
    fn connect_error_carries_reason() {
        let packet = EnginePacket::decode(r#"44{"message":"invalid token"}"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".into(),
                data: Some(json!({"message": "invalid token"})),
            })
        );
    }

    #[test]
    fn builds_socket_url_from_http_base() {
        assert_eq!(
            socket_url("http://100.31.177.152/"),
            "ws://100.31.177.152/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("https://admin.example.com"),
            "wss://admin.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }
}
