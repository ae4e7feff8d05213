//! Network Server Demo
//!
//! Connects to a real ChirpStack or TTN instance using environment variables
//! prefixed with the backend tag, lists every device and optionally sends a
//! downlink or listens for uplinks.
//!
//! ```text
//! CHIRPSTACK_API_URL=http://localhost:8090/api \
//! CHIRPSTACK_TOKEN=... \
//! CHIRPSTACK_NS_RELAY_URL=http://localhost:3000 \
//!     cargo run --example network_server_demo -- chirpstack
//!
//! cargo run --example network_server_demo -- ttn send eui-001a798816012b96 0102
//! cargo run --example network_server_demo -- ttn listen
//! ```

use anyhow::{bail, Context};
use lorabridge_devices::{create_adapter, BackendType, ServerConfig, UplinkEvent};
use std::sync::Arc;
use tracing::info;

fn init_logging() {
    let json_logging = std::env::var("LORABRIDGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("lorabridge=info,network_server_demo=info")
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let backend: BackendType = args
        .next()
        .unwrap_or_else(|| BackendType::ChirpStack.to_string())
        .parse()?;

    let prefix = backend.as_str().to_ascii_uppercase();
    let config = ServerConfig::from_env(&prefix)
        .with_context(|| format!("Reading {}_* environment variables", prefix))?;
    let adapter = create_adapter(backend, config)?;

    let devices = adapter.get_devices().await?;
    for device in &devices {
        let application = device
            .application
            .as_ref()
            .map(|app| app.name.clone().unwrap_or_else(|| app.id.clone()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<24} {}",
            device.id,
            device.name.as_deref().unwrap_or("-"),
            application
        );
    }
    info!(backend = %backend, devices = devices.len(), "Listed devices");

    match args.next().as_deref() {
        None => {}
        Some("send") => {
            let device_id = args.next().context("send needs a device id")?;
            let payload = hex::decode(args.next().unwrap_or_default())
                .context("Payload must be hex")?;
            let ack = adapter.send_message(&device_id, &payload).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        Some("listen") => {
            let ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
            let subscription = adapter
                .add_listener(
                    &ids,
                    Arc::new(|event: UplinkEvent| {
                        let payload = event.data.as_deref().map(hex::encode);
                        let metadata = serde_json::Value::Object(event.metadata);
                        info!(payload = ?payload, %metadata, "Uplink");
                    }),
                )
                .await?;

            info!("Listening for uplinks, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            subscription.close();
        }
        Some(other) => bail!("Unknown command: {}", other),
    }

    Ok(())
}
