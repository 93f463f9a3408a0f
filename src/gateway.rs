//! REST gateway client.
//!
//! Every response is expected in the `{success, data, message}` envelope.
//! A non-2xx status, an unparsable body or `success: false` is a failure.
//! Every call takes a [`CancellationToken`]; a cancelled call returns
//! [`Error::Cancelled`] without waiting for the response.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::activity::ActivityLogEntry;
use crate::config::GatewayConfig;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::user::User;

/// Query filters for collection fetches. Absent filters are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
}

impl ListFilters {
    pub fn is_empty(&self) -> bool {
        self == &ListFilters::default()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Gateway {
    /// Build a gateway client from configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;
        Ok(Self::with_client(&config.base_url, client))
    }

    /// Build a gateway client around a shared HTTP client.
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `GET /<collection>` with optional filters.
    pub async fn list<E: Entity>(
        &self,
        filters: &ListFilters,
        cancel: &CancellationToken,
    ) -> Result<Vec<E>> {
        debug!(path = E::PATH, ?filters, "fetching collection");
        let request = self.request(Method::GET, E::PATH).query(filters);
        let envelope = self.send::<Vec<E>>(request, cancel).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// `POST /<collection>`.
    pub async fn create<E: Entity>(
        &self,
        draft: &E::Draft,
        cancel: &CancellationToken,
    ) -> Result<E> {
        debug!(path = E::PATH, "creating entity");
        let request = self.request(Method::POST, E::PATH).json(draft);
        require_data(self.send::<E>(request, cancel).await?)
    }

    /// `PUT /<collection>/:id`.
    pub async fn update<E: Entity>(
        &self,
        id: i64,
        patch: &E::Patch,
        cancel: &CancellationToken,
    ) -> Result<E> {
        debug!(path = E::PATH, id, "updating entity");
        let request = self
            .request(Method::PUT, &format!("{}/{id}", E::PATH))
            .json(patch);
        require_data(self.send::<E>(request, cancel).await?)
    }

    /// `DELETE /<collection>/:id`.
    pub async fn delete<E: Entity>(&self, id: i64, cancel: &CancellationToken) -> Result<()> {
        debug!(path = E::PATH, id, "deleting entity");
        let request = self.request(Method::DELETE, &format!("{}/{id}", E::PATH));
        self.send::<serde_json::Value>(request, cancel).await?;
        Ok(())
    }

    /// `GET /users`.
    #[instrument(skip_all)]
    pub async fn list_users(&self, cancel: &CancellationToken) -> Result<Vec<User>> {
        let request = self.request(Method::GET, "users");
        let envelope = self.send::<Vec<User>>(request, cancel).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// `GET /permissions?role=<role>`.
    #[instrument(skip(self, cancel))]
    pub async fn role_permissions(
        &self,
        role: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let request = self
            .request(Method::GET, "permissions")
            .query(&[("role", role.trim())]);
        require_data(self.send::<Vec<String>>(request, cancel).await?)
    }

    /// `POST /activity-logs`. Callers decide what to do with failures.
    #[instrument(skip_all, fields(action = %entry.action))]
    pub async fn post_activity(
        &self,
        entry: &ActivityLogEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self.request(Method::POST, "activity-logs").json(entry);
        self.send::<serde_json::Value>(request, cancel).await?;
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Envelope<T>> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response?,
        };
        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.text() => body?,
        };

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            warn!(status = status.as_u16(), %message, "gateway returned error status");
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|err| Error::MalformedResponse(err.to_string()))?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "gateway reported failure".to_string());
            warn!(%message, "gateway rejected request");
            return Err(Error::Rejected(message));
        }
        Ok(envelope)
    }
}

fn require_data<T>(envelope: Envelope<T>) -> Result<T> {
    envelope
        .data
        .ok_or_else(|| Error::MalformedResponse("response envelope has no data".to_string()))
}
