//! Gateway device telemetry reported by `GET /health`.

use super::mode::ReliabilityMode;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

/// Point-in-time view of the gateway.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub mode: Option<ReliabilityMode>,
    pub ip: Option<String>,
    pub rssi: Option<i32>,
    pub uptime_ms: u64,
    pub last_key: Option<u8>,
    pub last_seq: u32,
    pub last_ack: Option<u32>,
    pub last_post_ok: Option<bool>,
}

#[derive(Debug, Default)]
struct Fields {
    mode: Option<ReliabilityMode>,
    ip: Option<String>,
    rssi: Option<i32>,
    last_key: Option<u8>,
    last_seq: u32,
    last_ack: Option<u32>,
    last_post_ok: Option<bool>,
}

/// Shared telemetry, updated by the runtime and the relay worker.
#[derive(Debug)]
pub struct Telemetry {
    device_id: String,
    booted_at: Instant,
    fields: Mutex<Fields>,
}

impl Telemetry {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            booted_at: Instant::now(),
            fields: Mutex::new(Fields::default()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Milliseconds since the gateway started.
    pub fn uptime_ms(&self) -> u64 {
        self.booted_at.elapsed().as_millis() as u64
    }

    fn with<T>(&self, f: impl FnOnce(&mut Fields) -> T) -> T {
        let mut fields = self.fields.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut fields)
    }

    pub fn set_mode(&self, mode: ReliabilityMode) {
        self.with(|f| f.mode = Some(mode));
    }

    pub fn mode(&self) -> Option<ReliabilityMode> {
        self.with(|f| f.mode)
    }

    pub fn set_ip(&self, ip: impl Into<String>) {
        let ip = ip.into();
        self.with(|f| f.ip = Some(ip));
    }

    pub fn set_rssi(&self, rssi: Option<i32>) {
        self.with(|f| f.rssi = rssi);
    }

    pub fn rssi(&self) -> Option<i32> {
        self.with(|f| f.rssi)
    }

    /// Record a classified outcome and the sequence number it was given.
    pub fn record_outcome(&self, key: u8, seq: u32) {
        self.with(|f| {
            f.last_key = Some(key);
            f.last_seq = seq;
        });
    }

    /// Record the result of delivering `seq`.
    pub fn record_delivery(&self, seq: u32, ok: bool) {
        self.with(|f| {
            f.last_post_ok = Some(ok);
            if ok {
                f.last_ack = Some(seq);
            }
        });
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let uptime_ms = self.uptime_ms();
        self.with(|f| TelemetrySnapshot {
            device_id: self.device_id.clone(),
            mode: f.mode,
            ip: f.ip.clone(),
            rssi: f.rssi,
            uptime_ms,
            last_key: f.last_key,
            last_seq: f.last_seq,
            last_ack: f.last_ack,
            last_post_ok: f.last_post_ok,
        })
    }
}
