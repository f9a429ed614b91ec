//! HTTP client for the proxy's management API (`/v1/*`).
//!
//! Every request carries the profile's key in the `x-key` header.

use std::time::Duration;

use async_trait::async_trait;
use proxydash_core::{FeedError, RequestRecord, Traffic, decode_batch};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::config::{Platform, Profile, format_address};
use crate::poller::PollSource;

const KEY_HEADER: &str = "x-key";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} rejected the API key (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// What the proxy reports about itself on a successful connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub platform: Platform,
    pub platform_version: String,
    pub platform_build: String,
}

impl ServerInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            platform: Platform::from_system_header(header("x-system").as_deref()),
            platform_version: header("x-surge-version").unwrap_or_default(),
            platform_build: header("x-surge-build").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl ApiClient {
    pub fn new(host: &str, port: u16, key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            http,
            base_url: format!("http://{}/v1", format_address(host, port)),
            key: key.to_string(),
        })
    }

    pub fn for_profile(profile: &Profile, timeout: Duration) -> Result<Self, ApiError> {
        Self::new(&profile.host, profile.port, &profile.key, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<(String, reqwest::Response), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .header(KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ApiError::Unauthorized {
                url,
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
            });
        }

        Ok((url, response))
    }

    /// Connectivity and key check (`GET /v1/outbound`).
    pub async fn check(&self) -> Result<ServerInfo, ApiError> {
        let (_, response) = self.get("/outbound").await?;
        Ok(ServerInfo::from_headers(response.headers()))
    }

    pub async fn traffic(&self) -> Result<Traffic, ApiError> {
        let (url, response) = self.get("/traffic").await?;
        response
            .json::<Traffic>()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// The proxy's current window of recent requests, newest first.
    pub async fn recent_requests(&self) -> Result<Vec<RequestRecord>, ApiError> {
        let (url, response) = self.get("/requests/recent").await?;
        let payload = response
            .json::<serde_json::Value>()
            .await
            .map_err(|source| ApiError::Decode { url, source })?;
        Ok(decode_batch(payload)?)
    }
}

/// Polls `GET /v1/requests/recent`.
pub struct RecentRequestsSource(pub ApiClient);

#[async_trait]
impl PollSource for RecentRequestsSource {
    type Output = Vec<RequestRecord>;

    async fn poll(&self) -> Result<Self::Output, ApiError> {
        self.0.recent_requests().await
    }
}

/// Polls `GET /v1/traffic`.
pub struct TrafficSource(pub ApiClient);

#[async_trait]
impl PollSource for TrafficSource {
    type Output = Traffic;

    async fn poll(&self) -> Result<Self::Output, ApiError> {
        self.0.traffic().await
    }
}
