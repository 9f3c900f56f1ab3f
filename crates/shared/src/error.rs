//! Shared error types.

use serde::Deserialize;

/// Error body returned by the admin API on failure.
///
/// The backend is not consistent about which key carries the text, so both
/// `message` and `error` are accepted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ErrorBody {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Attempt to parse an API error body into a user-facing message.
/// Prefers `message`, falls back to `error`.
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    [parsed.message, parsed.error]
        .into_iter()
        .flatten()
        .find(|m| !m.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Short message suitable for a non-blocking notification.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status, body } => {
                try_error_message(body).unwrap_or_else(|| format!("Request failed ({status})"))
            }
            other => other.to_string(),
        }
    }
}

/// Malformed or unsupported real-time packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("invalid ack id: {0}")]
    InvalidAckId(String),
    #[error("invalid packet payload: {0}")]
    Payload(String),
    #[error("event packet without a name")]
    MissingEventName,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Payload(e.to_string())
    }
}
