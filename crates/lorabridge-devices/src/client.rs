//! JSON-over-HTTP plumbing shared by the network-server adapters.

use crate::adapter::{AdapterError, AdapterResult};
use lorabridge_core::ServerConfig;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub(crate) const APPLICATION_JSON: &str = "application/json";

/// Which side of the boundary a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upstream {
    Backend,
    Relay,
}

/// Build the HTTP client for one adapter instance.
///
/// Timeouts are applied per request rather than on the client so the
/// long-lived uplink stream is never cut off.
pub(crate) fn build_http_client() -> AdapterResult<Client> {
    Client::builder()
        .build()
        .map_err(|e| AdapterError::Connection(format!("Failed to build HTTP client: {}", e)))
}

pub(crate) fn request_timeout(config: &ServerConfig) -> Option<Duration> {
    config.request_timeout_secs.map(Duration::from_secs)
}

pub(crate) fn with_timeout(request: RequestBuilder, timeout: Option<Duration>) -> RequestBuilder {
    match timeout {
        Some(timeout) => request.timeout(timeout),
        None => request,
    }
}

pub(crate) fn connection_error(e: reqwest::Error) -> AdapterError {
    AdapterError::Connection(format!("HTTP request failed: {}", e))
}

/// Check the status and decode the body.
///
/// A non-success status maps to `BackendUnavailable`/`RelayUnavailable`
/// carrying `operation`; an empty body decodes as JSON `null`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    operation: &'static str,
    upstream: Upstream,
) -> AdapterResult<T> {
    let status = response.status();
    if !status.is_success() {
        let status = status.as_u16();
        return Err(match upstream {
            Upstream::Backend => AdapterError::BackendUnavailable { operation, status },
            Upstream::Relay => AdapterError::RelayUnavailable { operation, status },
        });
    }

    let body = response.bytes().await.map_err(connection_error)?;
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &body
    };

    serde_json::from_slice(body)
        .map_err(|e| AdapterError::InvalidResponse(format!("{} {}", operation, e)))
}

/// Authenticated REST client for one backend API.
#[derive(Debug, Clone)]
pub(crate) struct BackendClient {
    http: Client,
    base: Url,
    auth_header: &'static str,
    token: String,
    timeout: Option<Duration>,
}

impl BackendClient {
    /// `auth_header` names the header carrying `Bearer {token}`.
    pub fn new(
        http: Client,
        config: &ServerConfig,
        auth_header: &'static str,
    ) -> AdapterResult<Self> {
        Ok(Self {
            http,
            base: config.api_base()?,
            auth_header,
            token: config.token.clone(),
            timeout: request_timeout(config),
        })
    }

    /// Resolve an endpoint path relative to the API base.
    pub fn endpoint(&self, path: &str) -> AdapterResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AdapterError::Configuration(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        with_timeout(request, self.timeout)
            .header(ACCEPT, APPLICATION_JSON)
            .header(self.auth_header, format!("Bearer {}", self.token))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        operation: &'static str,
    ) -> AdapterResult<T> {
        let url = self.endpoint(path)?;
        debug!(%url, ?query, "GET");

        let response = self
            .authorize(self.http.get(url))
            .query(query)
            .send()
            .await
            .map_err(connection_error)?;

        read_json(response, operation, Upstream::Backend).await
    }

    pub async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        operation: &'static str,
    ) -> AdapterResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");

        let response = self
            .authorize(self.http.post(url))
            .json(body)
            .send()
            .await
            .map_err(connection_error)?;

        read_json(response, operation, Upstream::Backend).await
    }
}
