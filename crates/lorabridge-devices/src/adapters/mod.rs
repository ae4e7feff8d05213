//! Network-server adapters and the adapter registry.
//!
//! Each backend is one [`NetworkServerAdapter`] implementation registered in
//! [`ADAPTER_CONSTRUCTORS`]. Supporting a new backend means adding a
//! [`BackendType`] variant, implementing the trait and adding one entry here.

pub mod chirpstack;
pub mod ttn;

pub use chirpstack::{create_chirpstack_adapter, ChirpStackAdapter};
pub use ttn::{create_ttn_adapter, SchedulePriority, TtnAdapter};

use crate::adapter::{AdapterError, AdapterResult, NetworkServerAdapter};
use lorabridge_core::{BackendType, ServerConfig};
use std::sync::Arc;
use tracing::info;

/// Adapter constructor signature.
pub type AdapterConstructor = fn(ServerConfig) -> AdapterResult<Arc<dyn NetworkServerAdapter>>;

/// Backend tag to constructor table.
pub static ADAPTER_CONSTRUCTORS: &[(BackendType, AdapterConstructor)] = &[
    (
        BackendType::ChirpStack,
        create_chirpstack_adapter as AdapterConstructor,
    ),
    (BackendType::Ttn, create_ttn_adapter as AdapterConstructor),
];

/// Create an adapter for `backend`.
///
/// # Example
/// ```no_run
/// use lorabridge_core::{BackendType, ServerConfig};
/// use lorabridge_devices::adapters::create_adapter;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let config = ServerConfig::new("http://chirpstack:8090/api/", "token")
///     .with_ns_relay_url("http://ns-relay:3000");
/// let adapter = create_adapter(BackendType::ChirpStack, config)?;
/// let devices = adapter.get_devices().await?;
/// # Ok(())
/// # }
/// ```
pub fn create_adapter(
    backend: BackendType,
    config: ServerConfig,
) -> AdapterResult<Arc<dyn NetworkServerAdapter>> {
    let constructor = ADAPTER_CONSTRUCTORS
        .iter()
        .find(|(tag, _)| *tag == backend)
        .map(|(_, constructor)| *constructor)
        .ok_or_else(|| AdapterError::UnknownBackendType(backend.to_string()))?;

    let adapter = constructor(config)?;
    info!(backend = %backend, "Created network-server adapter");
    Ok(adapter)
}

/// Parse `tag` and create the matching adapter.
///
/// Fails with [`AdapterError::UnknownBackendType`] before anything is
/// constructed when the tag is not registered.
pub fn create_adapter_from_tag(
    tag: &str,
    config: ServerConfig,
) -> AdapterResult<Arc<dyn NetworkServerAdapter>> {
    let backend: BackendType = tag.parse()?;
    create_adapter(backend, config)
}

/// Backends with a registered constructor.
pub fn available_backends() -> Vec<BackendType> {
    ADAPTER_CONSTRUCTORS.iter().map(|(tag, _)| *tag).collect()
}
