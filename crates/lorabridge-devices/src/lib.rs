//! LoRaWAN network-server adapters.
//!
//! This crate puts ChirpStack and The Things Network behind one
//! [`NetworkServerAdapter`] interface so callers can enumerate devices, send
//! downlinks and receive uplinks without caring which backend serves them.
//!
//! ## Architecture
//!
//! - **DeviceRegistry**: per-adapter cache of every device seen, with its
//!   tenant/application association when the backend has one
//! - **NetworkServerAdapter**: backend-specific REST integration
//! - **Adapter registry**: backend tag to constructor table
//!   ([`adapters::create_adapter`])
//! - **Event bridge**: uplink subscriptions over the ns-relay SSE stream
//!
//! Downlinks always pass through the ns-relay before the backend enqueue.

pub mod adapter;
pub mod adapters;
mod client;
pub mod downlink;
pub mod event_bridge;
pub mod registry;
pub mod relay;

pub use adapter::{AdapterError, AdapterResult, NetworkServerAdapter};
pub use adapters::{
    available_backends, create_adapter, create_adapter_from_tag, ChirpStackAdapter, TtnAdapter,
};
pub use downlink::{DownlinkCounters, DOWNLINK_COUNTER_BASELINE};
pub use event_bridge::{decode_uplink, BridgeError, Subscription, UplinkCallback, UplinkEvent};
pub use registry::{
    ApplicationRecord, Association, Attributes, DeviceRecord, DeviceRegistry, TenantRecord,
};
pub use relay::RelayClient;

pub use lorabridge_core::{BackendType, ServerConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
