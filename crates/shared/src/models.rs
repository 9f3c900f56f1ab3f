//! Data models for the frequency admin API.
//!
//! The backend is a document store, so ids arrive as `_id` and most fields
//! are optional in practice. Every struct here deserializes leniently:
//! unknown fields are ignored and missing ones take their defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Envelopes ---

/// A response that is either wrapped as `{success, data}` or returned bare.
///
/// Endpoints are inconsistent about this, so callers always decode through
/// the envelope and take [`Envelope::into_inner`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped {
        #[serde(default)]
        success: bool,
        data: T,
    },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data, .. } => data,
            Envelope::Bare(data) => data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

/// A page of items together with the server's pagination block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}


// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_online: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
}

/// User detail as returned by the detail endpoint.
///
/// Fields the admin views don't interpret are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub summary: UserSummary,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw body of the user collection endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UsersPayload {
    pub users: Vec<UserSummary>,
    pub total: u64,
}

/// A page of users as seen by the views.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserPage {
    pub records: Vec<UserSummary>,
    pub total: u64,
}

impl From<UsersPayload> for UserPage {
    fn from(payload: UsersPayload) -> Self {
        Self {
            records: payload.users,
            total: payload.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserStats {
    pub total: u64,
    pub daily_active: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DailyActivePoint {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserGrowthPoint {
    pub date: String,
    pub count: u64,
}

// --- Dashboard ---

/// Aggregate counters shown on the dashboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub active_frequencies: u64,
    pub private_frequencies: u64,
    pub daily_active_users: u64,
}

// --- Frequencies ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Frequency {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub participant_count: u64,
    pub creator: Option<UserRef>,
    pub is_private: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct FrequencyRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinHistoryEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: Option<UserRef>,
    pub frequency: Option<FrequencyRef>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct JoinHistoryPayload {
    pub history: Vec<JoinHistoryEntry>,
    pub pagination: Pagination,
}

// --- Reports ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "reviewed" => Ok(ReportStatus::Reviewed),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Report {
    #[serde(rename = "_id")]
    pub id: String,
    pub reason: String,
    pub status: ReportStatus,
    pub description: Option<String>,
    pub admin_notes: Option<String>,
    pub reporter: Option<UserRef>,
    pub reported_user: Option<UserRef>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReportsPayload {
    pub reports: Vec<Report>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportStats {
    pub total: u64,
    pub pending: u64,
    pub reviewed: u64,
    pub resolved: u64,
    pub dismissed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReportStatusRequest {
    pub status: ReportStatus,
    pub admin_notes: String,
}
