//! Domain events emitted to downstream consumers.
//!
//! The listener emits through an [`EventSink`]. What a consumer does with an
//! event (alerts, variables, scripting) is outside this crate.

use crate::types::PressKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// A relayed key outcome accepted by the listener.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub device_id: Option<String>,
    pub seq: Option<u32>,
    pub event: u8,
    pub key: u8,
    pub press: PressKind,
    pub held_ms: Option<u64>,
    pub received_at: DateTime<Utc>,
}

/// A device came online or went offline.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityChange {
    pub device_id: String,
    pub connected: bool,
    pub at: DateTime<Utc>,
    pub last_rssi: Option<i32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Key(KeyEvent),
    Connectivity(ConnectivityChange),
}

/// Sink errors.
#[derive(Debug)]
pub enum SinkError {
    /// The consumer could not take the event
    Unavailable(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Unavailable(msg) => write!(f, "Event sink unavailable: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Downstream consumer of host events.
///
/// `emit` runs inside the listener's per-request critical section; an error
/// on a key event fails the request and leaves the sequence uncommitted.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &HostEvent) -> Result<(), SinkError>;
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &HostEvent) -> Result<(), SinkError> {
        match event {
            HostEvent::Key(e) => tracing::info!(
                device_id = e.device_id.as_deref().unwrap_or("-"),
                seq = ?e.seq,
                event = e.event,
                key = e.key,
                press = %e.press,
                "key event"
            ),
            HostEvent::Connectivity(c) => tracing::info!(
                device_id = %c.device_id,
                connected = c.connected,
                "connectivity changed"
            ),
        }
        Ok(())
    }
}

/// Sink broadcasting events to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<HostEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &HostEvent) -> Result<(), SinkError> {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!("no subscribers for host event");
        }
        Ok(())
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HostEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn key_events(&self) -> Vec<KeyEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Key(k) => Some(k),
                HostEvent::Connectivity(_) => None,
            })
            .collect()
    }

    pub fn connectivity_changes(&self) -> Vec<ConnectivityChange> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Connectivity(c) => Some(c),
                HostEvent::Key(_) => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &HostEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event() -> HostEvent {
        HostEvent::Key(KeyEvent {
            device_id: Some("gw-1".to_string()),
            seq: Some(3),
            event: 40,
            key: 4,
            press: PressKind::Long,
            held_ms: Some(900),
            received_at: Utc::now(),
        })
    }

    #[test]
    fn test_host_event_tagging() {
        let json = serde_json::to_value(key_event()).unwrap();
        assert_eq!(json["type"], "key");
        assert_eq!(json["deviceId"], "gw-1");
        assert_eq!(json["press"], "long");
    }

    #[test]
    fn test_channel_sink_without_subscribers() {
        let sink = ChannelSink::new(8);
        assert!(sink.emit(&key_event()).is_ok());

        let mut rx = sink.subscribe();
        sink.emit(&key_event()).unwrap();
        assert!(matches!(rx.try_recv(), Ok(HostEvent::Key(_))));
    }

    #[test]
    fn test_memory_sink_split() {
        let sink = MemorySink::new();
        sink.emit(&key_event()).unwrap();
        sink.emit(&HostEvent::Connectivity(ConnectivityChange {
            device_id: "gw-1".to_string(),
            connected: true,
            at: Utc::now(),
            last_rssi: None,
        }))
        .unwrap();
        assert_eq!(sink.key_events().len(), 1);
        assert_eq!(sink.connectivity_changes().len(), 1);
    }
}
