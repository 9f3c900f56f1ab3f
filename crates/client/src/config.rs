//! Client configuration from environment variables.

use std::time::Duration;

use crate::error::{ClientError, Result};

pub const DEFAULT_API_URL: &str = "http://100.31.177.152/api";
pub const DEFAULT_SOCKET_URL: &str = "http://100.31.177.152";
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_REFRESH_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the REST API, including its path prefix.
    pub api_url: String,
    /// Base URL of the real-time server.
    pub socket_url: String,
    /// Bearer token; `None` falls back to the persisted token.
    pub token: Option<String>,
    /// Page size for the user list.
    pub page_size: u32,
    /// How often to resync as if the page regained visibility.
    pub refresh_interval: Duration,
    /// Free-text user search.
    pub search: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            search: String::new(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `FREQADMIN_API_URL`: REST base URL (default: "http://100.31.177.152/api")
    /// - `FREQADMIN_SOCKET_URL`: real-time base URL (default: "http://100.31.177.152")
    /// - `FREQADMIN_TOKEN`: bearer token (default: persisted token)
    /// - `FREQADMIN_PAGE_SIZE`: user list page size (default: 10)
    /// - `FREQADMIN_REFRESH_SECS`: periodic resync interval (default: 30)
    /// - `FREQADMIN_SEARCH`: user search text (default: empty)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_url = lookup("FREQADMIN_API_URL").unwrap_or(defaults.api_url);
        let socket_url = lookup("FREQADMIN_SOCKET_URL").unwrap_or(defaults.socket_url);
        for (key, value) in [("FREQADMIN_API_URL", &api_url), ("FREQADMIN_SOCKET_URL", &socket_url)] {
            url::Url::parse(value)
                .map_err(|e| ClientError::Config(format!("{key}={value}: {e}")))?;
        }

        let token = lookup("FREQADMIN_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let page_size = match lookup("FREQADMIN_PAGE_SIZE") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ClientError::Config(format!("FREQADMIN_PAGE_SIZE={raw}")))?,
            None => defaults.page_size,
        };

        let refresh_interval = match lookup("FREQADMIN_REFRESH_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| ClientError::Config(format!("FREQADMIN_REFRESH_SECS={raw}")))?,
            None => defaults.refresh_interval,
        };

        Ok(Self {
            api_url,
            socket_url,
            token,
            page_size,
            refresh_interval,
            search: lookup("FREQADMIN_SEARCH").unwrap_or_default(),
        })
    }
}
