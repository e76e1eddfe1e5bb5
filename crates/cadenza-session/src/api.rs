//! Client for the external identity/chart/record web API.
//!
//! The server never interprets chart or record content; it forwards the
//! opaque values the API returns. Every call is bounded by a 10-second
//! timeout and must run outside room locks; handlers fetch first and apply
//! the result afterwards.

use std::time::Duration;

use async_trait::async_trait;

use cadenza_protocol::{Chart, Profile, Record};

use crate::SessionError;

/// The three lookups the core consumes. A trait so tests (and alternative
/// backends) can stand in for the real service.
#[async_trait]
pub trait WebApi: Send + Sync + 'static {
    /// `GET /me` with a bearer token. Any failure is an authentication
    /// failure as far as the client is concerned.
    async fn me(&self, token: &str) -> Result<Profile, SessionError>;

    /// `GET /chart/{id}`.
    async fn chart(&self, id: i32) -> Result<Chart, SessionError>;

    /// `GET /record/{id}`.
    async fn record(&self, id: i32) -> Result<Record, SessionError>;
}

/// The production implementation over HTTP.
pub struct HttpApi {
    base: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub const DEFAULT_BASE: &'static str = "https://phira.5wyxi.com";
    const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()?;
        Ok(Self {
            base: base.into(),
            client,
        })
    }
}

#[async_trait]
impl WebApi for HttpApi {
    async fn me(&self, token: &str) -> Result<Profile, SessionError> {
        let response = self
            .client
            .get(format!("{}/me", self.base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "identity request failed");
                SessionError::AuthFailed
            })?;
        if !response.status().is_success() {
            return Err(SessionError::AuthFailed);
        }
        response.json().await.map_err(|e| {
            tracing::debug!(error = %e, "identity response malformed");
            SessionError::AuthFailed
        })
    }

    async fn chart(&self, id: i32) -> Result<Chart, SessionError> {
        let response = self
            .client
            .get(format!("{}/chart/{id}", self.base))
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, chart = id, "chart request failed");
                SessionError::ChartNotFound
            })?;
        if !response.status().is_success() {
            return Err(SessionError::ChartNotFound);
        }
        response.json().await.map_err(|e| {
            tracing::debug!(error = %e, chart = id, "chart response malformed");
            SessionError::ChartNotFound
        })
    }

    async fn record(&self, id: i32) -> Result<Record, SessionError> {
        let response = self
            .client
            .get(format!("{}/record/{id}", self.base))
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, record = id, "record request failed");
                SessionError::RecordNotFound
            })?;
        if !response.status().is_success() {
            return Err(SessionError::RecordNotFound);
        }
        response.json().await.map_err(|e| {
            tracing::debug!(error = %e, record = id, "record response malformed");
            SessionError::RecordNotFound
        })
    }
}
