//! ChirpStack network-server adapter.
//!
//! Talks to the ChirpStack v4 REST gateway. Devices are identified by their
//! EUI. Full enumeration walks tenants, then each tenant's applications, then
//! each application's devices, all paginated with `limit`/`offset`.
//!
//! ## Configuration
//!
//! ```toml
//! api_url = "http://chirpstack:8090/api/"
//! token = "eyJ0eXAiOiJKV1Qi..."
//! ns_relay_url = "http://ns-relay:3000"
//! ```

use crate::adapter::{AdapterError, AdapterResult, NetworkServerAdapter};
use crate::client::{build_http_client, BackendClient};
use crate::downlink::DownlinkCounters;
use crate::event_bridge::{Subscription, UplinkCallback};
use crate::registry::{
    ApplicationRecord, Association, Attributes, DeviceRecord, DeviceRegistry, TenantRecord,
};
use crate::relay::RelayClient;
use async_trait::async_trait;
use base64::prelude::*;
use lorabridge_core::{BackendType, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Page size for every listing call.
pub const RESULT_LIMIT: usize = 100;

/// FPort used for every queued downlink.
pub const DOWNLINK_FPORT: u8 = 1;

/// The REST gateway forwards this header as gRPC `authorization` metadata.
const AUTH_HEADER: &str = "Grpc-Metadata-Authorization";

const GET_TENANTS_FAILED: &str = "Failed to get user tenants.";
const GET_APPLICATIONS_FAILED: &str = "Failed to get tenant applications.";
const GET_DEVICES_FAILED: &str = "Failed to get application devices.";
const GET_DEVICE_FAILED: &str = "Failed to get device info.";
const ENQUEUE_FAILED: &str = "Failed to send message to device.";

/// One page of a ChirpStack listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    /// uint32 in the proto; some gateway versions render it as a string
    #[serde(default)]
    total_count: Option<Value>,
    #[serde(default)]
    result: Vec<Value>,
}

impl ListPage {
    fn total(&self) -> Option<usize> {
        match self.total_count.as_ref()? {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueItem<'a> {
    data: &'a str,
    f_port: u8,
    f_cnt_down: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest<'a> {
    queue_item: QueueItem<'a>,
}

/// ChirpStack adapter.
pub struct ChirpStackAdapter {
    config: ServerConfig,
    backend: BackendClient,
    relay: RelayClient,
    registry: DeviceRegistry,
    tenants: RwLock<HashMap<String, TenantRecord>>,
    applications: RwLock<HashMap<String, ApplicationRecord>>,
    downlink_counters: DownlinkCounters,
}

impl ChirpStackAdapter {
    /// Create a new ChirpStack adapter.
    pub fn new(config: ServerConfig) -> AdapterResult<Self> {
        let http = build_http_client()?;
        let backend = BackendClient::new(http.clone(), &config, AUTH_HEADER)?;
        let relay = RelayClient::new(http, &config, BackendType::ChirpStack)?;

        Ok(Self {
            config,
            backend,
            relay,
            registry: DeviceRegistry::new(),
            tenants: RwLock::new(HashMap::new()),
            applications: RwLock::new(HashMap::new()),
            downlink_counters: DownlinkCounters::new(),
        })
    }

    /// Tenants seen during enumeration.
    pub async fn tenants(&self) -> Vec<TenantRecord> {
        self.tenants.read().await.values().cloned().collect()
    }

    /// Applications seen during enumeration.
    pub async fn applications(&self) -> Vec<ApplicationRecord> {
        self.applications.read().await.values().cloned().collect()
    }

    /// Counter value the next downlink to `eui` will carry as `fCntDown`.
    pub async fn next_downlink_counter(&self, eui: &str) -> u32 {
        self.downlink_counters.next_value(eui).await
    }

    /// Fetch every page of a listing endpoint.
    async fn list_all(
        &self,
        path: &str,
        filter: Option<(&'static str, &str)>,
        operation: &'static str,
    ) -> AdapterResult<Vec<Value>> {
        let mut items = Vec::new();

        loop {
            let mut query = vec![
                ("limit", RESULT_LIMIT.to_string()),
                ("offset", items.len().to_string()),
            ];
            if let Some((key, value)) = filter {
                query.push((key, value.to_string()));
            }

            let page: ListPage = self.backend.get_json(path, &query, operation).await?;
            let total = page.total();
            let count = page.result.len();
            items.extend(page.result);

            // Without a total we cannot tell whether the server honours
            // `offset`, so stop after the first page.
            let more = count == RESULT_LIMIT && total.is_some_and(|total| items.len() < total);
            if !more {
                break;
            }
        }

        Ok(items)
    }

    async fn cache_tenant(&self, tenant: &TenantRecord) {
        self.tenants
            .write()
            .await
            .insert(tenant.id.clone(), tenant.clone());
    }

    async fn cache_application(&self, application: &ApplicationRecord) {
        self.applications
            .write()
            .await
            .insert(application.id.clone(), application.clone());
    }
}

fn into_object(value: Value, kind: &str) -> AdapterResult<Attributes> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AdapterError::InvalidResponse(format!(
            "Expected {} object, got {}",
            kind, other
        ))),
    }
}

fn string_field(attributes: &Attributes, key: &str) -> Option<String> {
    attributes.get(key).and_then(Value::as_str).map(str::to_string)
}

fn tenant_record(value: Value) -> AdapterResult<TenantRecord> {
    let attributes = into_object(value, "tenant")?;
    let id = string_field(&attributes, "id")
        .ok_or_else(|| AdapterError::InvalidResponse("Tenant without id".to_string()))?;

    Ok(TenantRecord {
        id,
        name: string_field(&attributes, "name"),
        attributes,
    })
}

fn application_record(value: Value, tenant: TenantRecord) -> AdapterResult<ApplicationRecord> {
    let attributes = into_object(value, "application")?;
    let id = string_field(&attributes, "id")
        .ok_or_else(|| AdapterError::InvalidResponse("Application without id".to_string()))?;

    Ok(ApplicationRecord {
        id,
        name: string_field(&attributes, "name"),
        tenant,
        attributes,
    })
}

/// Normalize a device from either a listing item (`devEui` at the top level)
/// or a single-device response (`devEui` under `device`).
fn device_record(value: Value) -> AdapterResult<DeviceRecord> {
    let attributes = into_object(value, "device")?;
    let inner = attributes.get("device").and_then(Value::as_object);

    let eui = string_field(&attributes, "devEui")
        .or_else(|| inner.and_then(|device| string_field(device, "devEui")))
        .ok_or_else(|| AdapterError::InvalidResponse("Device without devEui".to_string()))?;

    let mut record = DeviceRecord::new(eui, Attributes::new());
    record.name = string_field(&attributes, "name")
        .or_else(|| inner.and_then(|device| string_field(device, "name")));
    record.attributes = attributes;
    Ok(record)
}

#[async_trait]
impl NetworkServerAdapter for ChirpStackAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::ChirpStack
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    async fn get_device(&self, eui: &str) -> AdapterResult<DeviceRecord> {
        let path = format!("devices/{}", urlencoding::encode(eui));
        let raw: Value = self.backend.get_json(&path, &[], GET_DEVICE_FAILED).await?;

        let record = device_record(raw)?;
        Ok(self.registry.merge(record, None).await)
    }

    async fn get_devices(&self) -> AdapterResult<Vec<DeviceRecord>> {
        let tenants = self.list_all("tenants", None, GET_TENANTS_FAILED).await?;

        for raw_tenant in tenants {
            let tenant = tenant_record(raw_tenant)?;
            let applications = self
                .list_all(
                    "applications",
                    Some(("tenantId", tenant.id.as_str())),
                    GET_APPLICATIONS_FAILED,
                )
                .await?;
            self.cache_tenant(&tenant).await;

            for raw_application in applications {
                let application = application_record(raw_application, tenant.clone())?;
                let devices = self
                    .list_all(
                        "devices",
                        Some(("applicationId", application.id.as_str())),
                        GET_DEVICES_FAILED,
                    )
                    .await?;
                self.cache_application(&application).await;

                debug!(
                    tenant = %tenant.id,
                    application = %application.id,
                    devices = devices.len(),
                    "Fetched application devices"
                );

                for raw_device in devices {
                    let record = device_record(raw_device)?;
                    let association = Association {
                        application: application.clone(),
                        tenant: tenant.clone(),
                    };
                    self.registry.merge(record, Some(association)).await;
                }
            }
        }

        let devices = self.registry.list().await;
        info!(devices = devices.len(), "ChirpStack enumeration complete");
        Ok(devices)
    }

    async fn send_message(&self, eui: &str, payload: &[u8]) -> AdapterResult<Value> {
        let data = BASE64_STANDARD.encode(payload);

        self.relay.send_data(eui, &data).await?;

        let path = format!("devices/{}/queue", urlencoding::encode(eui));
        let backend = &self.backend;
        let data = data.as_str();

        self.downlink_counters
            .with_next(eui, |f_cnt_down| async move {
                debug!(eui, f_cnt_down, "Enqueueing ChirpStack downlink");
                let request = EnqueueRequest {
                    queue_item: QueueItem {
                        data,
                        f_port: DOWNLINK_FPORT,
                        f_cnt_down,
                    },
                };
                backend.post_json(&path, &request, ENQUEUE_FAILED).await
            })
            .await
    }

    async fn add_listener(
        &self,
        euis: &[String],
        callback: UplinkCallback,
    ) -> AdapterResult<Subscription> {
        self.relay.subscribe(euis, callback).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Create a ChirpStack adapter behind the adapter trait.
pub fn create_chirpstack_adapter(
    config: ServerConfig,
) -> AdapterResult<Arc<dyn NetworkServerAdapter>> {
    Ok(Arc::new(ChirpStackAdapter::new(config)?))
}
