//! Device Registry - in-memory cache of normalized device records
//!
//! Every adapter instance owns one registry keyed by the backend's device
//! identity (ChirpStack EUI, TTN device ID). Records are inserted on first
//! observation and afterwards only replaced by newer observations of the same
//! identity; nothing is ever evicted.
//!
//! ## Merge rule
//!
//! Application/tenant associations are only known during a full enumeration.
//! A merge that supplies an [`Association`] attaches it; a merge without one
//! carries the cached association forward. Once set, an association is never
//! cleared by a later fetch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Raw backend fields kept alongside the normalized ones.
pub type Attributes = Map<String, Value>;

/// Tenant (ChirpStack organization scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Application with a back-reference to its owning tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub name: Option<String>,
    pub tenant: TenantRecord,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Normalized device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Canonical identity (EUI or device ID, depending on backend)
    pub id: String,
    /// Human-readable name, when the backend reports one
    pub name: Option<String>,
    /// Owning application, absent until learned through enumeration
    pub application: Option<ApplicationRecord>,
    /// Owning tenant, absent until learned through enumeration
    pub tenant: Option<TenantRecord>,
    /// Backend response the record was built from
    #[serde(default)]
    pub attributes: Attributes,
}

impl DeviceRecord {
    /// Create a record without associations.
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            id: id.into(),
            name,
            application: None,
            tenant: None,
            attributes,
        }
    }
}

/// Application/tenant pair supplied while enumerating.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub application: ApplicationRecord,
    pub tenant: TenantRecord,
}

/// In-memory device registry.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a freshly fetched record and return the stored result.
    ///
    /// The whole read-modify-write runs under the write lock, so concurrent
    /// merges of the same identity are serialized.
    pub async fn merge(
        &self,
        mut record: DeviceRecord,
        association: Option<Association>,
    ) -> DeviceRecord {
        let mut devices = self.devices.write().await;

        match association {
            Some(Association {
                application,
                tenant,
            }) => {
                record.application = Some(application);
                record.tenant = Some(tenant);
            }
            None => {
                if let Some(cached) = devices.get(&record.id) {
                    record.application = cached.application.clone();
                    record.tenant = cached.tenant.clone();
                }
            }
        }

        devices.insert(record.id.clone(), record.clone());
        record
    }

    /// Get a device by identity.
    pub async fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// List all known devices.
    pub async fn list(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Check whether a device has been observed.
    pub async fn contains(&self, device_id: &str) -> bool {
        self.devices.read().await.contains_key(device_id)
    }

    /// Number of known devices.
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
