//! Domain types shared by the sensor, gateway and host sides.
//!
//! A physical key is identified by its index in the 6×6 matrix. A completed
//! press/release pair becomes an outcome, and an outcome maps onto an event
//! number in `0..72`: short presses keep the key index, long presses are
//! offset by the key count.

use serde::{Deserialize, Serialize};

/// Number of matrix rows.
pub const ROWS: usize = 6;
/// Number of matrix columns.
pub const COLS: usize = 6;
/// Number of physical keys.
pub const KEY_COUNT: usize = ROWS * COLS;
/// Number of distinct event numbers (short and long for every key).
pub const EVENT_COUNT: usize = KEY_COUNT * 2;

/// Header carrying the shared secret between gateway and host.
pub const SECRET_HEADER: &str = "X-Matrix-Secret";

/// Held duration at or above which a press is long.
pub const LONG_PRESS_THRESHOLD_MS: u64 = 600;

/// Whether a key went down or came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    Press,
    Release,
}

/// A debounced press or release of one matrix key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    /// Physical key index, `0..KEY_COUNT`
    pub key: u8,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn press(key: u8) -> Self {
        Self {
            key,
            kind: TransitionKind::Press,
        }
    }

    pub fn release(key: u8) -> Self {
        Self {
            key,
            kind: TransitionKind::Release,
        }
    }

    pub fn is_press(&self) -> bool {
        self.kind == TransitionKind::Press
    }
}

/// Short/long classification of a completed press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressKind {
    Short,
    Long,
}

impl PressKind {
    /// Classify a held duration against the given threshold (inclusive).
    pub fn classify(held_ms: u64, threshold_ms: u64) -> Self {
        if held_ms >= threshold_ms {
            PressKind::Long
        } else {
            PressKind::Short
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressKind::Short => "short",
            PressKind::Long => "long",
        }
    }
}

impl std::fmt::Display for PressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed press+release pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressOutcome {
    pub key: u8,
    pub held_ms: u64,
    pub kind: PressKind,
}

impl PressOutcome {
    /// Event number for this outcome, `0..EVENT_COUNT`.
    pub fn event_number(&self) -> u8 {
        event_number(self.key, self.kind)
    }
}

/// Map a key and press kind onto an event number.
pub fn event_number(key: u8, kind: PressKind) -> u8 {
    match kind {
        PressKind::Short => key,
        PressKind::Long => key + KEY_COUNT as u8,
    }
}

/// Inverse of [`event_number`]. Returns `None` outside `0..EVENT_COUNT`.
pub fn decode_event_number(event: u8) -> Option<(u8, PressKind)> {
    let event = event as usize;
    if event < KEY_COUNT {
        Some((event as u8, PressKind::Short))
    } else if event < EVENT_COUNT {
        Some(((event - KEY_COUNT) as u8, PressKind::Long))
    } else {
        None
    }
}

/// Payload relayed from the gateway device to the host listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub event: u8,
    pub seq: u32,
    pub device_id: String,
    pub key: u8,
    pub press: PressKind,
    pub held_ms: u64,
    pub uptime_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

impl RelayMessage {
    /// Build the message for an outcome with an already-assigned sequence number.
    pub fn from_outcome(
        outcome: &PressOutcome,
        seq: u32,
        device_id: impl Into<String>,
        uptime_ms: u64,
        rssi: Option<i32>,
    ) -> Self {
        Self {
            event: outcome.event_number(),
            seq,
            device_id: device_id.into(),
            key: outcome.key,
            press: outcome.kind,
            held_ms: outcome.held_ms,
            uptime_ms,
            rssi,
        }
    }
}

/// Acknowledgement body returned by the host listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}
