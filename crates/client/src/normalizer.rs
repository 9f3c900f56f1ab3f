//! Maps raw server events to the small set of domain events the stores
//! understand.

use freqadmin_shared::{
    DashboardStats, EVENT_DASHBOARD_STATS, EVENT_USER_JOINED_FREQUENCY, EVENT_USER_LEFT_FREQUENCY,
    EVENT_USER_STATUS_CHANGED,
};
use serde_json::Value;

/// Server events the client subscribes to.
pub const SUBSCRIBED_EVENTS: [&str; 4] = [
    EVENT_DASHBOARD_STATS,
    EVENT_USER_STATUS_CHANGED,
    EVENT_USER_LEFT_FREQUENCY,
    EVENT_USER_JOINED_FREQUENCY,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    UserOnline { user_id: String },
    UserOffline { user_id: String },
    DashboardStatsUpdated(DashboardStats),
}

/// Normalize a raw event. Malformed payloads yield `None` and a log line.
pub fn normalize(event: &str, payload: &Value) -> Option<DomainEvent> {
    match event {
        EVENT_USER_STATUS_CHANGED => {
            let user_id = required_str(event, payload.get("userId"))?;
            let online = payload.get("status").and_then(Value::as_str) == Some("online");
            Some(if online {
                DomainEvent::UserOnline { user_id }
            } else {
                DomainEvent::UserOffline { user_id }
            })
        }
        EVENT_USER_LEFT_FREQUENCY => {
            let user_id = required_str(event, payload.get("userId"))?;
            Some(DomainEvent::UserOffline { user_id })
        }
        EVENT_USER_JOINED_FREQUENCY => {
            let user_id = required_str(event, payload.pointer("/user/_id"))?;
            Some(DomainEvent::UserOnline { user_id })
        }
        EVENT_DASHBOARD_STATS => Some(DomainEvent::DashboardStatsUpdated(DashboardStats {
            total_users: count(payload, "totalUsers"),
            active_frequencies: count(payload, "activeFrequencies"),
            private_frequencies: count(payload, "privateFrequencies"),
            daily_active_users: count(payload, "dailyActiveUsers"),
        })),
        other => {
            tracing::debug!(event = %other, "ignoring unrecognized event");
            None
        }
    }
}

fn required_str(event: &str, value: Option<&Value>) -> Option<String> {
    match value.and_then(Value::as_str).filter(|id| !id.is_empty()) {
        Some(id) => Some(id.to_string()),
        None => {
            tracing::warn!(%event, "dropping event without a user id");
            None
        }
    }
}

/// Non-negative counter, 0 when missing or not a number.
fn count(payload: &Value, field: &str) -> u64 {
    let Some(value) = payload.get(field) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
        .unwrap_or(0)
}
