//! HTTP client for the convention backend
//!
//! [`ApiClient`] issues the full or incremental `Sync` request and the
//! private message request, validating status and content type before any
//! body is decoded. A failed request never yields a partial response.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as ReqwestClient, Response as ReqwestResponse};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::{CommunicationRecord, SyncResponse};
use crate::{ApiError, Result};

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base API URL without trailing slash (e.g., "https://app.eurofurence.org/EF29/api")
    pub api_base: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Custom headers to include in all requests
    pub default_headers: HashMap<String, String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://app.eurofurence.org/EF29/api".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("Companion-Cache/{}", env!("CARGO_PKG_VERSION")),
            default_headers: HashMap::new(),
        }
    }
}

impl ApiClientConfig {
    /// Create a new config with an API base URL
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a default header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// API Seam
// =============================================================================

/// Remote operations the cache depends on
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Fetch the sync envelope, incremental when `since` is given
    async fn fetch_sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResponse>;

    /// Fetch the private messages of the user owning `token`
    async fn fetch_private_messages(&self, token: &str) -> Result<Vec<CommunicationRecord>>;
}

/// Format a timestamp the way the backend expects the `since` parameter
pub fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the convention backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP client
    client: ReqwestClient,
    /// Configuration
    config: ApiClientConfig,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the client configuration
    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// Get the API base URL
    pub fn api_base(&self) -> &str {
        &self.config.api_base
    }

    /// Execute a GET request and decode a JSON body
    async fn get_json<T>(
        &self,
        path: &str,
        params: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.config.api_base, path);
        let mut req = self.client.get(&url);

        if !params.is_empty() {
            req = req.query(params);
        }

        for (key, value) in &self.config.default_headers {
            req = req.header(key, value);
        }

        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("Request to {} failed: {}", url, e)))?;

        Self::parse_response(response).await
    }

    /// Validate status and content type, then decode the body
    async fn parse_response<T>(response: ReqwestResponse) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.contains("application/json") {
            return Err(ApiError::ContentType(content_type));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Parse(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse JSON: {}", e)))
    }
}

#[async_trait]
impl SyncApi for ApiClient {
    async fn fetch_sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResponse> {
        let params: Vec<(&str, String)> = match since {
            Some(since) => vec![("since", format_since(since))],
            None => Vec::new(),
        };

        tracing::debug!(
            "Requesting {} sync from {}",
            if since.is_some() { "incremental" } else { "full" },
            self.config.api_base
        );

        self.get_json("Sync", &params, None).await
    }

    async fn fetch_private_messages(&self, token: &str) -> Result<Vec<CommunicationRecord>> {
        self.get_json("Communication/PrivateMessages", &[], Some(token)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
