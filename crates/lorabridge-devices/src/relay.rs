//! ns-relay client.
//!
//! The relay physically delivers downlinks to the radios and republishes
//! uplinks as server-sent events. Each backend is served under its own
//! namespace on the relay host:
//!
//! - `POST {relay}/{backend}/{id}/messages` with `{"data": "<base64>"}`
//! - `GET {relay}/{backend}/sse?{idParam}={id,id,...}`

use crate::adapter::{AdapterError, AdapterResult};
use crate::client::{
    connection_error, read_json, request_timeout, with_timeout, Upstream, APPLICATION_JSON,
};
use crate::event_bridge::{Subscription, UplinkCallback};
use lorabridge_core::{BackendType, ConfigError, ServerConfig};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const SEND_PAYLOAD_FAILED: &str = "Failed to send device payload.";
const SUBSCRIBE_FAILED: &str = "Failed to open uplink subscription.";

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    data: &'a str,
}

/// Relay client bound to one backend namespace.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    base: Option<Url>,
    backend: BackendType,
    timeout: Option<Duration>,
}

impl RelayClient {
    /// A missing relay URL is accepted here and reported on first use; a
    /// malformed one is rejected immediately.
    pub fn new(http: Client, config: &ServerConfig, backend: BackendType) -> AdapterResult<Self> {
        let base = match config.ns_relay_url {
            Some(_) => Some(config.relay_base()?),
            None => None,
        };

        Ok(Self {
            http,
            base,
            backend,
            timeout: request_timeout(config),
        })
    }

    fn base(&self) -> AdapterResult<&Url> {
        self.base
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("nsRelayUrl").into())
    }

    fn join(&self, path: &str) -> AdapterResult<Url> {
        self.base()?
            .join(path)
            .map_err(|e| AdapterError::Configuration(format!("Invalid relay path {}: {}", path, e)))
    }

    /// Downlink delivery endpoint for one device.
    pub fn messages_url(&self, device_id: &str) -> AdapterResult<Url> {
        self.join(&format!(
            "/{}/{}/messages",
            self.backend.as_str(),
            urlencoding::encode(device_id)
        ))
    }

    /// Uplink stream endpoint for a set of devices.
    pub fn sse_url(&self, device_ids: &[String]) -> AdapterResult<Url> {
        let ids: Vec<_> = device_ids
            .iter()
            .map(|id| urlencoding::encode(id))
            .collect();

        self.join(&format!(
            "/{}/sse?{}={}",
            self.backend.as_str(),
            self.backend.relay_id_param(),
            ids.join(",")
        ))
    }

    /// Hand a base64 payload to the relay for physical delivery.
    pub async fn send_data(
        &self,
        device_id: &str,
        data: &str,
    ) -> AdapterResult<serde_json::Value> {
        let url = self.messages_url(device_id)?;
        debug!(%url, "Relaying downlink");

        let response = with_timeout(self.http.post(url), self.timeout)
            .header(ACCEPT, APPLICATION_JSON)
            .json(&RelayPayload { data })
            .send()
            .await
            .map_err(connection_error)?;

        read_json(response, SEND_PAYLOAD_FAILED, Upstream::Relay).await
    }

    /// Open the uplink stream for `device_ids`.
    pub async fn subscribe(
        &self,
        device_ids: &[String],
        callback: UplinkCallback,
    ) -> AdapterResult<Subscription> {
        let url = self.sse_url(device_ids)?;

        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::RelayUnavailable {
                operation: SUBSCRIBE_FAILED,
                status: status.as_u16(),
            });
        }

        info!(
            backend = %self.backend,
            devices = device_ids.len(),
            "Opened uplink subscription"
        );

        Ok(Subscription::spawn(url.to_string(), response.bytes_stream(), callback))
    }
}
