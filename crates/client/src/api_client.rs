//! HTTP API client for the admin REST backend.

use freqadmin_shared::ApiError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::Storage;

/// HTTP client for bearer-authenticated JSON requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    storage: Option<Storage>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
            storage: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the bearer token sent with every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Storage holding the persisted token; it is cleared on `401`.
    pub fn with_storage(mut self, storage: Option<Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn url_with_query(&self, path: &str, query: &[(&str, String)]) -> String {
        let url = self.url(path);
        if query.is_empty() {
            return url;
        }
        let qs = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{url}?{qs}")
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send(&self, method: &str, url: &str, rb: RequestBuilder) -> Result<String, ApiError> {
        tracing::debug!(%method, %url, "api request");

        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(%url, "api rejected token, clearing persisted token");
            if let Some(storage) = &self.storage {
                storage.clear_token();
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    fn decode<TRes: DeserializeOwned>(text: &str) -> Result<TRes, ApiError> {
        let text = if text.trim().is_empty() { "null" } else { text };
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<TRes, ApiError> {
        let url = self.url_with_query(path, query);
        let text = self.send("GET", &url, self.client.get(&url)).await?;
        Self::decode(&text)
    }

    /// Make a PUT request with JSON body
    pub async fn put_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let url = self.url(path);
        let rb = self.client.put(&url).json(body);
        let text = self.send("PUT", &url, rb).await?;
        Self::decode(&text)
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        self.send("DELETE", &url, self.client.delete(&url)).await?;
        Ok(())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_path() {
        let api = ApiClient::new().with_base_url("http://host/api/");
        assert_eq!(api.url("/admin/users"), "http://host/api/admin/users");
        assert_eq!(api.url("admin/users"), "http://host/api/admin/users");
        assert_eq!(api.url("https://other/x"), "https://other/x");
        assert_eq!(ApiClient::new().url("x"), "/x");
    }

    #[test]
    fn encodes_query_values() {
        let api = ApiClient::new().with_base_url("http://host/api");
        let url = api.url_with_query(
            "/admin/users",
            &[("page", "1".into()), ("search", "ana maria&co".into())],
        );
        assert_eq!(
            url,
            "http://host/api/admin/users?page=1&search=ana%20maria%26co"
        );
    }
}
