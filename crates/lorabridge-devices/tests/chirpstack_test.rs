//! ChirpStack adapter against an in-process mock of the REST gateway and
//! the ns-relay.

mod common;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{check_bearer, spawn_server, CallLog};
use lorabridge_devices::{
    create_adapter, AdapterError, BackendType, ChirpStackAdapter, NetworkServerAdapter,
    ServerConfig,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const TOKEN: &str = "secret-token";
const AUTH_HEADER: &str = "grpc-metadata-authorization";

const METER_DEVICES: usize = 250;
const SENSOR_EUI: &str = "aabbccddeeff0011";
const UNKNOWN_EUI: &str = "ffffffffffffffff";

#[derive(Clone, Default)]
struct MockChirpStack {
    log: CallLog,
    queued: Arc<Mutex<Vec<(String, Value)>>>,
    fail_tenants: Arc<AtomicBool>,
    fail_applications: Arc<AtomicBool>,
    fail_devices: Arc<AtomicBool>,
    fail_relay: Arc<AtomicBool>,
    /// Also list the sensor device under the otherwise empty application a-3
    sensor_in_two_applications: Arc<AtomicBool>,
}

impl MockChirpStack {
    fn queued_for(&self, eui: &str) -> Vec<Value> {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .filter(|(queued_eui, _)| queued_eui == eui)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

fn meter_eui(i: usize) -> String {
    format!("{:016x}", i)
}

fn tenants_fixture() -> Vec<Value> {
    vec![
        json!({"id": "t-1", "name": "Acme"}),
        json!({"id": "t-2", "name": "Globex"}),
    ]
}

fn applications_fixture(tenant_id: &str) -> Vec<Value> {
    match tenant_id {
        "t-1" => vec![json!({"id": "a-1", "name": "Meters"})],
        "t-2" => vec![
            json!({"id": "a-2", "name": "Sensors"}),
            json!({"id": "a-3", "name": "Empty"}),
        ],
        _ => Vec::new(),
    }
}

fn devices_fixture(application_id: &str) -> Vec<Value> {
    match application_id {
        "a-1" => (0..METER_DEVICES)
            .map(|i| json!({"devEui": meter_eui(i), "name": format!("meter-{}", i)}))
            .collect(),
        "a-2" => vec![json!({"devEui": SENSOR_EUI, "name": "sensor"})],
        _ => Vec::new(),
    }
}

fn query_usize(query: &HashMap<String, String>, key: &str, default: usize) -> usize {
    query
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn page(items: Vec<Value>, query: &HashMap<String, String>) -> Json<Value> {
    let limit = query_usize(query, "limit", 10);
    let offset = query_usize(query, "offset", 0);
    let total = items.len();
    let result: Vec<Value> = items.into_iter().skip(offset).take(limit).collect();
    Json(json!({"totalCount": total, "result": result}))
}

async fn list_tenants(
    State(mock): State<MockChirpStack>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    check_bearer(&headers, AUTH_HEADER, TOKEN)?;
    if mock.fail_tenants.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    mock.log.push(format!(
        "GET tenants offset={}",
        query_usize(&query, "offset", 0)
    ));
    Ok(page(tenants_fixture(), &query))
}

async fn list_applications(
    State(mock): State<MockChirpStack>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    check_bearer(&headers, AUTH_HEADER, TOKEN)?;
    if mock.fail_applications.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let tenant_id = query.get("tenantId").ok_or(StatusCode::BAD_REQUEST)?;
    mock.log.push(format!("GET applications tenant={}", tenant_id));
    Ok(page(applications_fixture(tenant_id), &query))
}

async fn list_devices(
    State(mock): State<MockChirpStack>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    check_bearer(&headers, AUTH_HEADER, TOKEN)?;
    if mock.fail_devices.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let application_id = query.get("applicationId").ok_or(StatusCode::BAD_REQUEST)?;
    mock.log.push(format!(
        "GET devices app={} offset={}",
        application_id,
        query_usize(&query, "offset", 0)
    ));

    let shared = mock.sensor_in_two_applications.load(Ordering::SeqCst);
    let devices = if shared && application_id == "a-3" {
        devices_fixture("a-2")
    } else {
        devices_fixture(application_id)
    };
    Ok(page(devices, &query))
}

async fn get_device(
    headers: HeaderMap,
    Path(eui): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    check_bearer(&headers, AUTH_HEADER, TOKEN)?;
    let device = ["a-1", "a-2"]
        .into_iter()
        .flat_map(devices_fixture)
        .find(|device| device["devEui"] == eui.as_str())
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(json!({
        "device": device,
        "deviceStatus": {"margin": 7, "batteryLevel": 88.5}
    })))
}

async fn enqueue(
    State(mock): State<MockChirpStack>,
    headers: HeaderMap,
    Path(eui): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    check_bearer(&headers, AUTH_HEADER, TOKEN)?;
    if eui == UNKNOWN_EUI {
        return Err(StatusCode::NOT_FOUND);
    }
    mock.log.push(format!("enqueue {}", eui));

    let mut queued = mock.queued.lock().unwrap();
    queued.push((eui, body));
    Ok(Json(json!({"id": format!("q-{}", queued.len())})))
}

async fn relay_message(
    State(mock): State<MockChirpStack>,
    Path(eui): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if mock.fail_relay.load(Ordering::SeqCst) {
        return Err(StatusCode::BAD_GATEWAY);
    }
    let data = body["data"].as_str().unwrap_or_default();
    mock.log.push(format!("relay {} {}", eui, data));
    Ok(Json(json!({"status": "sent"})))
}

async fn setup_with_token(token: &str) -> (MockChirpStack, Arc<dyn NetworkServerAdapter>) {
    common::init_tracing();

    let mock = MockChirpStack::default();
    let router = Router::new()
        .route("/api/tenants", get(list_tenants))
        .route("/api/applications", get(list_applications))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:eui", get(get_device))
        .route("/api/devices/:eui/queue", post(enqueue))
        .route("/chirpstack/:eui/messages", post(relay_message))
        .with_state(mock.clone());
    let base = spawn_server(router).await;

    let config = ServerConfig::new(format!("{}/api", base), token)
        .with_ns_relay_url(base)
        .with_request_timeout(5);
    let adapter = create_adapter(BackendType::ChirpStack, config).unwrap();
    (mock, adapter)
}

async fn setup() -> (MockChirpStack, Arc<dyn NetworkServerAdapter>) {
    setup_with_token(TOKEN).await
}

fn chirpstack(adapter: &Arc<dyn NetworkServerAdapter>) -> &ChirpStackAdapter {
    adapter.as_any().downcast_ref::<ChirpStackAdapter>().unwrap()
}

#[tokio::test]
async fn test_enumerates_every_tenant_application_and_device() {
    let (_mock, adapter) = setup().await;

    let devices = adapter.get_devices().await.unwrap();
    assert_eq!(devices.len(), METER_DEVICES + 1);

    let sensor = devices.iter().find(|d| d.id == SENSOR_EUI).unwrap();
    assert_eq!(sensor.name.as_deref(), Some("sensor"));
    assert_eq!(sensor.application.as_ref().unwrap().id, "a-2");
    assert_eq!(sensor.tenant.as_ref().unwrap().name.as_deref(), Some("Globex"));

    let meter = devices.iter().find(|d| d.id == meter_eui(199)).unwrap();
    let application = meter.application.as_ref().unwrap();
    assert_eq!(application.name.as_deref(), Some("Meters"));
    assert_eq!(application.tenant.id, "t-1");

    let chirpstack = chirpstack(&adapter);
    assert_eq!(chirpstack.tenants().await.len(), 2);
    assert_eq!(chirpstack.applications().await.len(), 3);
}

#[tokio::test]
async fn test_device_listing_is_paginated() {
    let (mock, adapter) = setup().await;

    adapter.get_devices().await.unwrap();

    assert_eq!(
        mock.log.matching("GET devices app=a-1"),
        vec![
            "GET devices app=a-1 offset=0",
            "GET devices app=a-1 offset=100",
            "GET devices app=a-1 offset=200",
        ]
    );
    assert_eq!(mock.log.matching("GET tenants"), vec!["GET tenants offset=0"]);
    assert_eq!(mock.log.matching("GET devices app=a-3").len(), 1);
}

#[tokio::test]
async fn test_repeated_enumeration_does_not_duplicate() {
    let (_mock, adapter) = setup().await;

    adapter.get_devices().await.unwrap();
    let devices = adapter.get_devices().await.unwrap();

    let ids: BTreeSet<_> = devices.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids.len(), devices.len());
    assert_eq!(adapter.registry().len().await, METER_DEVICES + 1);
}

#[tokio::test]
async fn test_device_listed_under_two_applications_is_one_record() {
    let (mock, adapter) = setup().await;
    mock.sensor_in_two_applications.store(true, Ordering::SeqCst);

    let devices = adapter.get_devices().await.unwrap();
    assert_eq!(devices.len(), METER_DEVICES + 1);

    let sensors: Vec<_> = devices.iter().filter(|d| d.id == SENSOR_EUI).collect();
    assert_eq!(sensors.len(), 1);
    // applications are walked in order, the last listing wins
    assert_eq!(sensors[0].application.as_ref().unwrap().id, "a-3");
    assert_eq!(sensors[0].tenant.as_ref().unwrap().id, "t-2");
}

#[tokio::test]
async fn test_get_device_keeps_association_from_enumeration() {
    let (_mock, adapter) = setup().await;

    let before = adapter.get_device(SENSOR_EUI).await.unwrap();
    assert!(before.application.is_none());
    assert!(before.tenant.is_none());

    adapter.get_devices().await.unwrap();

    let after = adapter.get_device(SENSOR_EUI).await.unwrap();
    assert_eq!(after.application.as_ref().unwrap().id, "a-2");
    assert_eq!(after.tenant.as_ref().unwrap().id, "t-2");
    assert!(after.attributes.contains_key("deviceStatus"));

    let cached = adapter.registry().get(SENSOR_EUI).await.unwrap();
    assert_eq!(cached, after);
}

#[tokio::test]
async fn test_get_device_unknown() {
    let (_mock, adapter) = setup().await;

    let err = adapter.get_device(UNKNOWN_EUI).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable {
            operation: "Failed to get device info.",
            status: 404
        }
    ));
    assert!(!adapter.registry().contains(UNKNOWN_EUI).await);
}

#[tokio::test]
async fn test_tenant_failure_surfaces_operation() {
    let (mock, adapter) = setup().await;
    mock.fail_tenants.store(true, Ordering::SeqCst);

    let err = adapter.get_devices().await.unwrap_err();
    assert!(err.to_string().contains("Failed to get user tenants."));
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable { status: 503, .. }
    ));
}

#[tokio::test]
async fn test_application_failure_surfaces_operation() {
    let (mock, adapter) = setup().await;
    mock.fail_applications.store(true, Ordering::SeqCst);

    let err = adapter.get_devices().await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable {
            operation: "Failed to get tenant applications.",
            status: 500
        }
    ));
    assert!(adapter.registry().is_empty().await);
}

#[tokio::test]
async fn test_device_listing_failure_surfaces_operation() {
    let (mock, adapter) = setup().await;
    mock.fail_devices.store(true, Ordering::SeqCst);

    let err = adapter.get_devices().await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable {
            operation: "Failed to get application devices.",
            status: 500
        }
    ));

    // the first tenant was committed before its devices were requested
    let chirpstack = chirpstack(&adapter);
    assert_eq!(chirpstack.tenants().await.len(), 1);
    assert!(chirpstack.applications().await.is_empty());
    assert!(adapter.registry().is_empty().await);
}

#[tokio::test]
async fn test_wrong_token_rejected() {
    let (_mock, adapter) = setup_with_token("expired").await;

    let err = adapter.get_devices().await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable { status: 401, .. }
    ));
}

#[tokio::test]
async fn test_send_message_relays_before_enqueue() {
    let (mock, adapter) = setup().await;

    let ack = adapter
        .send_message(SENSOR_EUI, &[0x01, 0x02, 0x03])
        .await
        .unwrap();
    assert_eq!(ack["id"], "q-1");

    assert_eq!(
        mock.log.calls(),
        vec![
            format!("relay {} AQID", SENSOR_EUI),
            format!("enqueue {}", SENSOR_EUI),
        ]
    );
    assert_eq!(
        mock.queued_for(SENSOR_EUI),
        vec![json!({"queueItem": {"data": "AQID", "fPort": 1, "fCntDown": 1000}})]
    );
}

#[tokio::test]
async fn test_downlink_counters_are_per_device() {
    let (mock, adapter) = setup().await;
    let other = meter_eui(0);

    for _ in 0..3 {
        adapter.send_message(SENSOR_EUI, b"ping").await.unwrap();
    }
    adapter.send_message(&other, b"ping").await.unwrap();

    let counters = |eui: &str| -> Vec<u64> {
        mock.queued_for(eui)
            .iter()
            .map(|body| body["queueItem"]["fCntDown"].as_u64().unwrap())
            .collect()
    };
    assert_eq!(counters(SENSOR_EUI), vec![1000, 1001, 1002]);
    assert_eq!(counters(&other), vec![1000]);
    assert_eq!(chirpstack(&adapter).next_downlink_counter(SENSOR_EUI).await, 1003);
}

#[tokio::test]
async fn test_enumeration_does_not_reset_counters() {
    let (mock, adapter) = setup().await;

    adapter.send_message(SENSOR_EUI, b"first").await.unwrap();
    adapter.get_devices().await.unwrap();
    adapter.get_device(SENSOR_EUI).await.unwrap();
    adapter.send_message(SENSOR_EUI, b"second").await.unwrap();

    let used: Vec<u64> = mock
        .queued_for(SENSOR_EUI)
        .iter()
        .map(|body| body["queueItem"]["fCntDown"].as_u64().unwrap())
        .collect();
    assert_eq!(used, vec![1000, 1001]);
}

#[tokio::test]
async fn test_concurrent_sends_get_distinct_counters() {
    let (mock, adapter) = setup().await;

    let sends = (0..10).map(|i| {
        let adapter = adapter.clone();
        async move { adapter.send_message(SENSOR_EUI, &[i]).await }
    });
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    let used: BTreeSet<u64> = mock
        .queued_for(SENSOR_EUI)
        .iter()
        .map(|body| body["queueItem"]["fCntDown"].as_u64().unwrap())
        .collect();
    assert_eq!(used, (1000..1010).collect());
}

#[tokio::test]
async fn test_relay_failure_skips_enqueue() {
    let (mock, adapter) = setup().await;
    mock.fail_relay.store(true, Ordering::SeqCst);

    let err = adapter.send_message(SENSOR_EUI, b"ping").await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::RelayUnavailable {
            operation: "Failed to send device payload.",
            status: 502
        }
    ));
    assert!(mock.log.matching("enqueue").is_empty());
    assert_eq!(chirpstack(&adapter).next_downlink_counter(SENSOR_EUI).await, 1000);
}

#[tokio::test]
async fn test_enqueue_failure_keeps_counter() {
    let (mock, adapter) = setup().await;

    let err = adapter.send_message(UNKNOWN_EUI, b"ping").await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::BackendUnavailable {
            operation: "Failed to send message to device.",
            status: 404
        }
    ));
    assert_eq!(mock.log.matching("relay").len(), 1);
    assert_eq!(chirpstack(&adapter).next_downlink_counter(UNKNOWN_EUI).await, 1000);
}
