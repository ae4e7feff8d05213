//! Network-server backend tags.
//!
//! A [`BackendType`] selects which adapter the registry constructs and also
//! names the namespace the ns-relay serves that backend under
//! (`{relay}/chirpstack/...`, `{relay}/ttn/...`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raised when a tag does not name any registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown backend type: {0}")]
pub struct UnknownBackendType(pub String);

/// LoRaWAN network-server backends known to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ChirpStack v4 (REST gateway in front of the gRPC API)
    ChirpStack,
    /// The Things Network / The Things Stack
    Ttn,
}

impl BackendType {
    /// Every backend tag, in registration order.
    pub const ALL: [BackendType; 2] = [BackendType::ChirpStack, BackendType::Ttn];

    /// Tag string, also used as the relay namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChirpStack => "chirpstack",
            Self::Ttn => "ttn",
        }
    }

    /// Query parameter the relay SSE endpoint expects the identity list under.
    pub fn relay_id_param(&self) -> &'static str {
        match self {
            Self::ChirpStack => "eui",
            Self::Ttn => "deviceId",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = UnknownBackendType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chirpstack" => Ok(Self::ChirpStack),
            "ttn" => Ok(Self::Ttn),
            _ => Err(UnknownBackendType(s.to_string())),
        }
    }
}
