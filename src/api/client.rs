//! Authenticated HTTP client for the Remedi REST API
//!
//! Wraps reqwest::Client with bearer-token injection and status checks that
//! tell an expired session apart from other failures.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::Config;

/// Errors from the REST API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("401 Unauthorized for {url}")]
    Unauthorized { url: String },

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    /// An expired or revoked token. Callers route this to the login flow and
    /// keep it out of warning-level logs.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Classify a non-success status.
    pub fn from_status(status: u16, url: &str, body: String) -> Self {
        if status == 401 {
            ApiError::Unauthorized { url: url.to_string() }
        } else {
            ApiError::Status {
                status,
                url: url.to_string(),
                body,
            }
        }
    }
}

/// Client for the Remedi API, bound to one bearer token.
pub struct RemediClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl RemediClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Build from the stored config. Fails if no usable token is stored.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .token
            .as_ref()
            .context("Not logged in. Run `remedi-chat login` first.")?;
        if token.is_expired() {
            bail!("Session expired. Run `remedi-chat login`.");
        }
        Ok(Self::new(&config.server.api_base, &token.token))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {} {:?}", url, query);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;

        let resp = check_status(resp, &url).await?;
        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// POST a JSON body to `path` and decode the JSON reply.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let resp = self.post(path, body).await?;
        let url = self.url(path);
        resp.json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// POST a JSON body to `path`, ignoring the reply body.
    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;

        check_status(resp, &url).await
    }
}

/// Check HTTP response status code and return a classified error on failure.
pub(crate) async fn check_status(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let err = ApiError::from_status(status.as_u16(), url, body);
    if err.is_auth_expired() {
        tracing::debug!("{}", err);
    }
    Err(err)
}
