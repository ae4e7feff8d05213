//! LoRaBridge core types.
//!
//! Shared between the adapter crate and whatever process owns configuration:
//! - [`BackendType`]: tag selecting a network-server backend
//! - [`ServerConfig`]: connection parameters for one adapter instance

pub mod backend;
pub mod config;

pub use backend::{BackendType, UnknownBackendType};
pub use config::{ConfigError, ServerConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
