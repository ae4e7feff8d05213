//! The Things Network (The Things Stack v3) adapter.
//!
//! Devices are identified by `ids.device_id` and always belong to the single
//! application named in the configuration. TTN has no tenant concept, so
//! device records never carry associations.
//!
//! ## Configuration
//!
//! ```toml
//! api_url = "https://eu1.cloud.thethings.network/api/v3/"
//! token = "NNSXS...."
//! ns_relay_url = "http://ns-relay:3000"
//! # either an explicit id ...
//! app_id = "my-app"
//! # ... or the console URL it is derived from
//! app_url = "https://eu1.cloud.thethings.network/console/applications/my-app"
//! ```

use crate::adapter::{AdapterError, AdapterResult, NetworkServerAdapter};
use crate::client::{build_http_client, BackendClient};
use crate::event_bridge::{Subscription, UplinkCallback};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::relay::RelayClient;
use async_trait::async_trait;
use base64::prelude::*;
use lorabridge_core::{BackendType, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// FPort used for every pushed downlink.
pub const DOWNLINK_FPORT: u8 = 1;

const AUTH_HEADER: &str = "Authorization";

const GET_DEVICES_FAILED: &str = "Failed to get application devices.";
const GET_DEVICE_FAILED: &str = "Failed to get device info.";
const PUSH_FAILED: &str = "Failed to send message to device.";

/// Downlink queue priority (`ttnpb.TxSchedulePriority`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulePriority {
    Lowest,
    Low,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Highest,
}

#[derive(Debug, Serialize)]
struct Downlink<'a> {
    f_port: u8,
    frm_payload: &'a str,
    priority: SchedulePriority,
}

#[derive(Debug, Serialize)]
struct DownlinkPush<'a> {
    downlinks: Vec<Downlink<'a>>,
}

/// TTN omits empty repeated fields, so a missing list means no devices.
#[derive(Debug, Deserialize)]
struct EndDeviceList {
    #[serde(default)]
    end_devices: Vec<Value>,
}

/// TTN adapter.
pub struct TtnAdapter {
    config: ServerConfig,
    app_id: String,
    backend: BackendClient,
    relay: RelayClient,
    registry: DeviceRegistry,
}

impl TtnAdapter {
    /// Create a new TTN adapter.
    ///
    /// The application id is resolved once here; when the configuration has
    /// none it is derived from the last path segment of `app_url`.
    pub fn new(config: ServerConfig) -> AdapterResult<Self> {
        let app_id = config.resolve_app_id()?;
        if config.app_id.is_none() {
            info!(app_id = %app_id, "Derived TTN application id from application URL");
        }

        let http = build_http_client()?;
        let backend = BackendClient::new(http.clone(), &config, AUTH_HEADER)?;
        let relay = RelayClient::new(http, &config, BackendType::Ttn)?;

        Ok(Self {
            config,
            app_id,
            backend,
            relay,
            registry: DeviceRegistry::new(),
        })
    }

    /// Effective application identifier.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn devices_path(&self) -> String {
        format!("applications/{}/devices", urlencoding::encode(&self.app_id))
    }
}

/// Normalize an end device; identity is the nested `ids.device_id`.
fn device_record(value: Value) -> AdapterResult<DeviceRecord> {
    let Value::Object(attributes) = value else {
        return Err(AdapterError::InvalidResponse(
            "Expected end device object".to_string(),
        ));
    };

    let device_id = attributes
        .get("ids")
        .and_then(|ids| ids.get("device_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::InvalidResponse("End device without ids.device_id".to_string())
        })?;

    Ok(DeviceRecord::new(device_id, attributes))
}

#[async_trait]
impl NetworkServerAdapter for TtnAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Ttn
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    async fn get_device(&self, device_id: &str) -> AdapterResult<DeviceRecord> {
        let path = format!("{}/{}", self.devices_path(), urlencoding::encode(device_id));
        let raw: Value = self.backend.get_json(&path, &[], GET_DEVICE_FAILED).await?;

        let record = device_record(raw)?;
        Ok(self.registry.merge(record, None).await)
    }

    async fn get_devices(&self) -> AdapterResult<Vec<DeviceRecord>> {
        let list: EndDeviceList = self
            .backend
            .get_json(&self.devices_path(), &[], GET_DEVICES_FAILED)
            .await?;

        for raw_device in list.end_devices {
            let record = device_record(raw_device)?;
            self.registry.merge(record, None).await;
        }

        let devices = self.registry.list().await;
        info!(app_id = %self.app_id, devices = devices.len(), "TTN enumeration complete");
        Ok(devices)
    }

    async fn send_message(&self, device_id: &str, payload: &[u8]) -> AdapterResult<Value> {
        let data = BASE64_STANDARD.encode(payload);

        self.relay.send_data(device_id, &data).await?;

        let path = format!(
            "as/applications/{}/devices/{}/down/push",
            urlencoding::encode(&self.app_id),
            urlencoding::encode(device_id)
        );
        let request = DownlinkPush {
            downlinks: vec![Downlink {
                f_port: DOWNLINK_FPORT,
                frm_payload: &data,
                priority: SchedulePriority::Highest,
            }],
        };

        debug!(device_id, "Pushing TTN downlink");
        self.backend.post_json(&path, &request, PUSH_FAILED).await
    }

    async fn add_listener(
        &self,
        device_ids: &[String],
        callback: UplinkCallback,
    ) -> AdapterResult<Subscription> {
        self.relay.subscribe(device_ids, callback).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Create a TTN adapter behind the adapter trait.
pub fn create_ttn_adapter(config: ServerConfig) -> AdapterResult<Arc<dyn NetworkServerAdapter>> {
    Ok(Arc::new(TtnAdapter::new(config)?))
}
