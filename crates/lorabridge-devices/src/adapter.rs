//! Network-server adapter interface.
//!
//! Every LoRaWAN backend (ChirpStack, TTN, ...) is integrated through the
//! [`NetworkServerAdapter`] trait, so callers can enumerate devices, push
//! downlinks and listen for uplinks without knowing which backend a device
//! lives on.

use crate::event_bridge::{Subscription, UplinkCallback};
use crate::registry::{DeviceRecord, DeviceRegistry};
use async_trait::async_trait;
use lorabridge_core::{BackendType, ConfigError, ServerConfig, UnknownBackendType};
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for network-server adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The backend API answered with a non-success status
    #[error("{operation} (backend responded with HTTP {status})")]
    BackendUnavailable { operation: &'static str, status: u16 },

    /// The ns-relay answered with a non-success status
    #[error("{operation} (relay responded with HTTP {status})")]
    RelayUnavailable { operation: &'static str, status: u16 },

    /// No adapter is registered for the requested backend tag
    #[error("Unknown backend type: {0}")]
    UnknownBackendType(String),

    /// Adapter configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure before any response status was received
    #[error("Connection error: {0}")]
    Connection(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ConfigError> for AdapterError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<UnknownBackendType> for AdapterError {
    fn from(e: UnknownBackendType) -> Self {
        Self::UnknownBackendType(e.0)
    }
}

/// Network-server adapter trait.
///
/// Each implementation owns its own device registry, auxiliary caches and
/// downlink counters; two adapter instances never share state.
#[async_trait]
pub trait NetworkServerAdapter: Send + Sync {
    /// Backend this adapter talks to.
    fn backend_type(&self) -> BackendType;

    /// Configuration the adapter was built from.
    fn config(&self) -> &ServerConfig;

    /// Devices observed so far by this adapter.
    fn registry(&self) -> &DeviceRegistry;

    /// Fetch one device and merge it into the registry.
    ///
    /// Associations learned by an earlier [`get_devices`](Self::get_devices)
    /// are carried forward, never cleared.
    async fn get_device(&self, device_id: &str) -> AdapterResult<DeviceRecord>;

    /// Enumerate every device reachable with the configured credentials and
    /// return the full registry contents. Order is unspecified.
    async fn get_devices(&self) -> AdapterResult<Vec<DeviceRecord>>;

    /// Deliver a raw downlink payload.
    ///
    /// The payload goes to the ns-relay first and is enqueued on the backend
    /// only once the relay accepted it. Returns the backend acknowledgement.
    async fn send_message(&self, device_id: &str, payload: &[u8])
        -> AdapterResult<serde_json::Value>;

    /// Open one uplink subscription for `device_ids` on the ns-relay.
    ///
    /// The callback runs on a background task for every received event.
    /// Dropping or closing the returned handle tears the stream down.
    async fn add_listener(
        &self,
        device_ids: &[String],
        callback: UplinkCallback,
    ) -> AdapterResult<Subscription>;

    /// Get this adapter as `Any` for downcasting
    fn as_any(&self) -> &dyn std::any::Any;
}
