//! Per-device downlink frame counters.
//!
//! ChirpStack expects an explicit `fCntDown` on every queued downlink. The
//! counters live for the lifetime of the owning adapter only.

use crate::adapter::AdapterResult;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// First counter value handed out for a device.
pub const DOWNLINK_COUNTER_BASELINE: u32 = 1000;

/// Downlink counters keyed by device identity.
#[derive(Debug, Default)]
pub struct DownlinkCounters {
    counters: DashMap<String, Arc<Mutex<u32>>>,
}

impl DownlinkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value the next enqueue for `device_id` will use.
    pub async fn next_value(&self, device_id: &str) -> u32 {
        let slot = self.counters.get(device_id).map(|entry| entry.value().clone());
        match slot {
            Some(slot) => *slot.lock().await,
            None => DOWNLINK_COUNTER_BASELINE,
        }
    }

    /// Run `enqueue` with the device's next counter value.
    ///
    /// The device's counter stays locked until `enqueue` resolves and only
    /// advances when it succeeds; other devices are unaffected. Like the
    /// 32-bit LoRaWAN `FCntDown`, it wraps at `u32::MAX`.
    pub async fn with_next<F, Fut, T>(&self, device_id: &str, enqueue: F) -> AdapterResult<T>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let slot = self
            .counters
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DOWNLINK_COUNTER_BASELINE)))
            .value()
            .clone();

        let mut next = slot.lock().await;
        let result = enqueue(*next).await;
        if result.is_ok() {
            *next = next.wrapping_add(1);
        }
        result
    }
}
