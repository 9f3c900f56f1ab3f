//! Snapshot fetcher: authoritative reads from the REST backend.
//!
//! Reads never fail from the caller's point of view. Any transport, server
//! or decode error is logged and replaced by an empty result so the views
//! stay renderable. Mutations (`delete_*`, `update_report_status`) return
//! their error so the caller can notify the user.

use chrono::NaiveDate;
use freqadmin_shared::{
    ApiError, DailyActivePoint, DashboardStats, Envelope, Frequency, JoinHistoryEntry,
    JoinHistoryPayload, Paged, Report, ReportStats, ReportStatus, ReportsPayload,
    UpdateReportStatusRequest, UserDetail, UserGrowthPoint, UserPage, UserStats, UsersPayload,
};

use crate::api_client::ApiClient;
use crate::error::{ClientError, Result};

const USERS_PATH: &str = "/admin/users";
const USER_STATS_PATH: &str = "/admin/users/stats";
const DAILY_ACTIVE_PATH: &str = "/admin/users/daily-active";
const USER_GROWTH_PATH: &str = "/admin/users/growth";
const ACTIVE_FREQUENCIES_PATH: &str = "/admin/frequencies/active";
const PRIVATE_FREQUENCIES_PATH: &str = "/admin/frequencies/private";
const JOIN_HISTORY_PATH: &str = "/frequencies/join-history/all";
const REPORTS_PATH: &str = "/admin/reports";
const REPORT_STATS_PATH: &str = "/admin/reports/stats";

/// A validated page request: `page >= 1`, `page_size > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page < 1 || page_size == 0 {
            return Err(ClientError::InvalidPage { page, page_size });
        }
        Ok(Self { page, page_size })
    }

    pub fn first(page_size: u32) -> Result<Self> {
        Self::new(1, page_size)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page", self.page.to_string()),
            ("limit", self.page_size.to_string()),
        ]
    }
}

/// Inclusive join-date filter; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("startDate", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end {
            params.push(("endDate", end.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

fn degrade<T: Default>(what: &'static str, result: std::result::Result<T, ApiError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, notice = %e.user_message(), "failed to fetch {what}");
            T::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    api: ApiClient,
}

impl SnapshotFetcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, ApiError> {
        self.api
            .get_json::<Envelope<T>>(path, query)
            .await
            .map(Envelope::into_inner)
    }

    // --- Users ---

    pub async fn fetch_users(&self, page: PageRequest, search: &str) -> UserPage {
        let mut query = page.query();
        if !search.is_empty() {
            query.push(("search", search.to_string()));
        }
        let result = self
            .get::<UsersPayload>(USERS_PATH, &query)
            .await
            .map(UserPage::from);
        let users = degrade("users", result);
        tracing::debug!(count = users.records.len(), total = users.total, "fetched users");
        users
    }

    pub async fn fetch_user(&self, user_id: &str) -> Option<UserDetail> {
        let path = format!("{USERS_PATH}/{}", urlencoding::encode(user_id));
        match self.get::<UserDetail>(&path, &[]).await {
            Ok(detail) => Some(detail),
            Err(e) => {
                tracing::error!(error = %e, notice = %e.user_message(), %user_id, "failed to fetch user details");
                None
            }
        }
    }

    pub async fn delete_user(&self, user_id: &str) -> std::result::Result<(), ApiError> {
        let path = format!("{USERS_PATH}/{}", urlencoding::encode(user_id));
        self.api.delete(&path).await.inspect_err(|e| {
            tracing::error!(error = %e, notice = %e.user_message(), %user_id, "failed to delete user");
        })
    }

    pub async fn fetch_daily_active_users(&self, days: u32) -> Vec<DailyActivePoint> {
        let result = self
            .get::<Vec<DailyActivePoint>>(DAILY_ACTIVE_PATH, &[("days", days.to_string())])
            .await;
        degrade("daily active users", result)
    }

    pub async fn fetch_user_growth(&self, days: u32) -> Vec<UserGrowthPoint> {
        let result = self
            .get::<Vec<UserGrowthPoint>>(USER_GROWTH_PATH, &[("days", days.to_string())])
            .await;
        degrade("user growth", result)
    }

    // --- Dashboard ---

    /// Dashboard counters derived from the user stats and the two frequency
    /// collections, fetched concurrently. Fails if any of them fails.
    pub async fn try_dashboard_snapshot(&self) -> std::result::Result<DashboardStats, ApiError> {
        let (user_stats, active, private) = tokio::try_join!(
            self.get::<UserStats>(USER_STATS_PATH, &[]),
            self.get::<Vec<Frequency>>(ACTIVE_FREQUENCIES_PATH, &[]),
            self.get::<Vec<Frequency>>(PRIVATE_FREQUENCIES_PATH, &[]),
        )?;

        Ok(DashboardStats {
            total_users: user_stats.total,
            active_frequencies: active.len() as u64,
            private_frequencies: private.len() as u64,
            daily_active_users: user_stats.daily_active,
        })
    }

    pub async fn fetch_dashboard_snapshot(&self) -> DashboardStats {
        degrade("dashboard stats", self.try_dashboard_snapshot().await)
    }

    // --- Frequencies ---

    pub async fn fetch_active_frequencies(&self) -> Vec<Frequency> {
        degrade(
            "active frequencies",
            self.get::<Vec<Frequency>>(ACTIVE_FREQUENCIES_PATH, &[]).await,
        )
    }

    pub async fn fetch_private_frequencies(&self) -> Vec<Frequency> {
        degrade(
            "private frequencies",
            self.get::<Vec<Frequency>>(PRIVATE_FREQUENCIES_PATH, &[])
                .await,
        )
    }

    pub async fn fetch_join_history(
        &self,
        page: PageRequest,
        range: DateRange,
    ) -> Paged<JoinHistoryEntry> {
        let mut query = page.query();
        query.extend(range.query());
        let result = self
            .get::<JoinHistoryPayload>(JOIN_HISTORY_PATH, &query)
            .await
            .map(|payload| Paged {
                items: payload.history,
                pagination: payload.pagination,
            });
        degrade("join history", result)
    }

    // --- Reports ---

    pub async fn fetch_reports(
        &self,
        page: PageRequest,
        status: Option<ReportStatus>,
    ) -> Paged<Report> {
        let mut query = page.query();
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        let result = self
            .get::<ReportsPayload>(REPORTS_PATH, &query)
            .await
            .map(|payload| Paged {
                items: payload.reports,
                pagination: payload.pagination,
            });
        degrade("reports", result)
    }

    pub async fn fetch_report_stats(&self) -> Option<ReportStats> {
        match self.get::<ReportStats>(REPORT_STATS_PATH, &[]).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!(error = %e, notice = %e.user_message(), "failed to fetch report stats");
                None
            }
        }
    }

    pub async fn update_report_status(
        &self,
        report_id: &str,
        status: ReportStatus,
        admin_notes: &str,
    ) -> std::result::Result<(), ApiError> {
        let path = format!("{REPORTS_PATH}/{}/status", urlencoding::encode(report_id));
        let body = UpdateReportStatusRequest {
            status,
            admin_notes: admin_notes.to_string(),
        };
        self.api
            .put_json::<_, serde_json::Value>(&path, &body)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                tracing::error!(error = %e, notice = %e.user_message(), %report_id, "failed to update report status");
            })
    }

    pub async fn delete_report(&self, report_id: &str) -> std::result::Result<(), ApiError> {
        let path = format!("{REPORTS_PATH}/{}", urlencoding::encode(report_id));
        self.api.delete(&path).await.inspect_err(|e| {
            tracing::error!(error = %e, notice = %e.user_message(), %report_id, "failed to delete report");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::test_support::{serve, serve_routes};
    use axum::http::{header, Method};

    fn fetcher(base: &str) -> SnapshotFetcher {
        SnapshotFetcher::new(ApiClient::new().with_base_url(base))
    }

    #[test]
    fn page_request_rejects_out_of_range() {
        assert!(matches!(
            PageRequest::new(0, 10),
            Err(ClientError::InvalidPage { page: 0, page_size: 10 })
        ));
        assert!(PageRequest::new(1, 0).is_err());
        assert_eq!(PageRequest::first(20).unwrap().page(), 1);
    }

    #[test]
    fn date_range_only_sends_set_bounds() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 3, 1),
            end: None,
        };
        assert_eq!(range.query(), vec![("startDate", "2025-03-01".to_string())]);
        assert!(DateRange::default().query().is_empty());
    }

    #[tokio::test]
    async fn users_wrapped_and_bare_extract_the_same_page() {
        let users = r#"[{"_id":"u1","name":"Ana","isOnline":true},{"_id":"u2","isOnline":false}]"#;
        let wrapped = serve(200, &format!(r#"{{"success":true,"data":{{"users":{users},"total":5}}}}"#)).await;
        let bare = serve(200, &format!(r#"{{"users":{users},"total":5}}"#)).await;

        let page = PageRequest::first(10).unwrap();
        let a = fetcher(&wrapped.base_url).fetch_users(page, "").await;
        let b = fetcher(&bare.base_url).fetch_users(page, "").await;

        assert_eq!(a, b);
        assert_eq!(a.total, 5);
        assert_eq!(a.records.len(), 2);

        let request = wrapped.requests().await.remove(0);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.uri, "/admin/users?page=1&limit=10");
    }

    #[tokio::test]
    async fn server_error_degrades_to_empty_page() {
        let server = serve(500, r#"{"success":false,"message":"db down"}"#).await;
        let page = fetcher(&server.base_url)
            .fetch_users(PageRequest::first(10).unwrap(), "ana")
            .await;
        assert_eq!(page, UserPage::default());
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_empty_results() {
        let fetcher = fetcher("http://127.0.0.1:1/api");
        assert!(fetcher.fetch_active_frequencies().await.is_empty());
        assert_eq!(fetcher.fetch_dashboard_snapshot().await, DashboardStats::default());
        assert!(fetcher.fetch_report_stats().await.is_none());
        assert!(fetcher.delete_report("r1").await.is_err());
    }

    #[tokio::test]
    async fn dashboard_snapshot_counts_frequency_collections() {
        let server = serve_routes(vec![
            ("/admin/users/stats", 200, r#"{"success":true,"data":{"total":42,"dailyActive":7}}"#),
            ("/admin/frequencies/active", 200, r#"[{"_id":"f1","name":"A"},{"_id":"f2","name":"B"}]"#),
            ("/admin/frequencies/private", 200, r#"{"data":[{"_id":"p1","name":"P"}]}"#),
        ])
        .await;

        let stats = fetcher(&server.base_url).fetch_dashboard_snapshot().await;
        assert_eq!(
            stats,
            DashboardStats {
                total_users: 42,
                active_frequencies: 2,
                private_frequencies: 1,
                daily_active_users: 7,
            }
        );
    }

    #[tokio::test]
    async fn join_history_sends_filters_and_reads_pagination() {
        let server = serve(
            200,
            r#"{"success":true,"data":{"history":[{"_id":"h1","joinedAt":"2025-03-02T10:00:00Z"}],"pagination":{"page":2,"limit":20,"total":21,"pages":2}}}"#,
        )
        .await;
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 3, 1),
            end: NaiveDate::from_ymd_opt(2025, 3, 31),
        };
        let history = fetcher(&server.base_url)
            .fetch_join_history(PageRequest::new(2, 20).unwrap(), range)
            .await;

        assert_eq!(history.items.len(), 1);
        assert_eq!(history.pagination.total, 21);
        let request = server.requests().await.remove(0);
        assert!(request.uri.ends_with("startDate=2025-03-01&endDate=2025-03-31"));
    }

    #[tokio::test]
    async fn report_status_update_sends_body() {
        let server = serve(200, r#"{"success":true}"#).await;
        fetcher(&server.base_url)
            .update_report_status("r1", ReportStatus::Resolved, "handled")
            .await
            .unwrap();
        let request = server.requests().await.remove(0);
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.uri, "/admin/reports/r1/status");
        assert_eq!(request.body, r#"{"status":"resolved","adminNotes":"handled"}"#);
    }

    #[tokio::test]
    async fn unauthorized_clears_persisted_token() {
        let storage = Storage::at(
            std::env::temp_dir().join(format!("freqadmin-test-{}", uuid::Uuid::new_v4())),
        );
        storage.save_token("stale");
        let server = serve(401, r#"{"message":"jwt expired"}"#).await;
        let api = ApiClient::new()
            .with_base_url(&server.base_url)
            .with_token(Some("stale".into()))
            .with_storage(Some(storage.clone()));

        let result = SnapshotFetcher::new(api).delete_user("u1").await;
        assert_eq!(result, Err(ApiError::Unauthorized));
        assert_eq!(storage.load_token(), None);

        let request = server.requests().await.remove(0);
        assert_eq!(request.header(header::AUTHORIZATION), Some("Bearer stale"));
        let _ = std::fs::remove_dir_all(storage.dir());
    }
}
