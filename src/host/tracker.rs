//! Per-device sequence deduplication and connectivity tracking.
//!
//! Lifecycle of a device: `Unknown -> Connected -> Offline -> Connected -> ...`.
//! A device becomes known on its first accepted message and is demoted to
//! offline when nothing has been seen from it for the offline timeout.

use super::sink::ConnectivityChange;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Connectivity key for senders that do not identify themselves.
///
/// Empty device ids are treated as absent, so no real device can share it.
pub const ANONYMOUS_DEVICE: &str = "";

/// How far a device's boot time must move forward before a low sequence
/// number is taken as a restart. Must stay above the gateway's worst-case
/// retry delay, or a late retry would look like a new boot.
pub const REBOOT_EPOCH_TOLERANCE: Duration = Duration::from_secs(10);

/// Outcome of the sequence check for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    /// Higher than anything processed for this device
    Fresh,
    /// At or below the last processed sequence: acknowledge, do not reprocess
    Duplicate,
    /// Low sequence from a device whose boot time moved forward; processing resets its history
    Reseeded,
    /// No device id or no sequence: always processed
    Untracked,
}

impl SeqVerdict {
    pub fn should_process(&self) -> bool {
        !matches!(self, SeqVerdict::Duplicate)
    }
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    last_processed_seq: u32,
    last_uptime_ms: Option<u64>,
    /// Wall-clock boot time of the device, `received_at - uptimeMs`
    boot_epoch: Option<DateTime<Utc>>,
    connected: bool,
    last_seen_at: DateTime<Utc>,
    last_rssi: Option<i32>,
}

/// Connectivity view of one device.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,
    pub connected: bool,
    pub last_seen_at: DateTime<Utc>,
    pub last_rssi: Option<i32>,
    pub last_processed_seq: u32,
}

pub struct DeviceTracker {
    devices: HashMap<String, DeviceRecord>,
    offline_timeout: Duration,
    accept_reboot_reseed: bool,
}

impl DeviceTracker {
    pub fn new(offline_timeout: Duration, accept_reboot_reseed: bool) -> Self {
        Self {
            devices: HashMap::new(),
            offline_timeout,
            accept_reboot_reseed,
        }
    }

    /// Classify a message received at `now` without changing any state.
    pub fn check(
        &self,
        device_id: Option<&str>,
        seq: Option<u32>,
        uptime_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> SeqVerdict {
        let (Some(device_id), Some(seq)) = (device_id.filter(|id| !id.is_empty()), seq) else {
            return SeqVerdict::Untracked;
        };
        let Some(record) = self.devices.get(device_id) else {
            return if seq == 0 {
                SeqVerdict::Duplicate
            } else {
                SeqVerdict::Fresh
            };
        };

        let tolerance = chrono::Duration::from_std(REBOOT_EPOCH_TOLERANCE)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        // Positive when the message claims a later boot than the record.
        let epoch_shift = match (boot_epoch(now, uptime_ms), record.boot_epoch) {
            (Some(epoch), Some(known)) => Some(epoch - known),
            _ => None,
        };

        if seq > record.last_processed_seq {
            // A late retry from before the last restart.
            if matches!(epoch_shift, Some(shift) if shift < -tolerance) {
                return SeqVerdict::Duplicate;
            }
            return SeqVerdict::Fresh;
        }

        let restarted = matches!(
            (uptime_ms, record.last_uptime_ms),
            (Some(current), Some(before)) if current < before
        ) && matches!(epoch_shift, Some(shift) if shift > tolerance);

        if self.accept_reboot_reseed && restarted {
            SeqVerdict::Reseeded
        } else {
            SeqVerdict::Duplicate
        }
    }

    /// Record that `seq`, received at `now`, has been fully processed.
    pub fn commit(&mut self, device_id: &str, seq: u32, uptime_ms: Option<u64>, now: DateTime<Utc>) {
        let record = self.record_mut(device_id, now);
        record.last_processed_seq = seq;
        if uptime_ms.is_some() {
            record.last_uptime_ms = uptime_ms;
            record.boot_epoch = boot_epoch(now, uptime_ms);
        }
    }

    /// Mark a device as seen. Returns a change if it was not connected.
    pub fn observe(&mut self, device_id: &str, rssi: Option<i32>, now: DateTime<Utc>) -> Option<ConnectivityChange> {
        let record = self.record_mut(device_id, now);
        record.last_seen_at = now;
        if rssi.is_some() {
            record.last_rssi = rssi;
        }
        if record.connected {
            return None;
        }
        record.connected = true;
        Some(ConnectivityChange {
            device_id: device_id.to_string(),
            connected: true,
            at: now,
            last_rssi: record.last_rssi,
        })
    }

    /// Demote devices that have been silent for longer than the timeout.
    ///
    /// Each device produces at most one change per offline transition.
    pub fn check_liveness(&mut self, now: DateTime<Utc>) -> Vec<ConnectivityChange> {
        let timeout = chrono::Duration::from_std(self.offline_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut changes = Vec::new();

        for (device_id, record) in self.devices.iter_mut() {
            if record.connected && now - record.last_seen_at > timeout {
                record.connected = false;
                changes.push(ConnectivityChange {
                    device_id: device_id.clone(),
                    connected: false,
                    at: now,
                    last_rssi: record.last_rssi,
                });
            }
        }
        changes
    }

    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.devices.get(device_id).map(|r| to_status(device_id, r))
    }

    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<DeviceStatus> = self
            .devices
            .iter()
            .map(|(id, r)| to_status(id, r))
            .collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    fn record_mut(&mut self, device_id: &str, now: DateTime<Utc>) -> &mut DeviceRecord {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord {
                last_processed_seq: 0,
                last_uptime_ms: None,
                boot_epoch: None,
                connected: false,
                last_seen_at: now,
                last_rssi: None,
            })
    }
}

fn boot_epoch(received_at: DateTime<Utc>, uptime_ms: Option<u64>) -> Option<DateTime<Utc>> {
    let uptime = chrono::Duration::milliseconds(i64::try_from(uptime_ms?).ok()?);
    received_at.checked_sub_signed(uptime)
}

fn to_status(device_id: &str, record: &DeviceRecord) -> DeviceStatus {
    DeviceStatus {
        device_id: device_id.to_string(),
        connected: record.connected,
        last_seen_at: record.last_seen_at,
        last_rssi: record.last_rssi,
        last_processed_seq: record.last_processed_seq,
    }
}
