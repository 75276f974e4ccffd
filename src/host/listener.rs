//! HTTP listener receiving relayed key events.
//!
//! # Request handling
//!
//! ```text
//! POST /event ──▶ authenticate ──▶ parse ──▶ validate ──▶ dedup check
//!                                                            │
//!                          emit to sink ◀────── fresh ───────┤
//!                               │                            │
//!                        commit seq, ack            duplicate: ack only
//! ```
//!
//! Per-device state is held under one mutex for the whole check/emit/commit
//! step, so concurrent requests for a device are serialized.

use super::sink::{ConnectivityChange, EventSink, HostEvent, KeyEvent, SinkError};
use super::stats::{ListenerStats, StatsSnapshot};
use super::tracker::{DeviceStatus, DeviceTracker, SeqVerdict, ANONYMOUS_DEVICE};
use crate::config::HostSettings;
use crate::types::{decode_event_number, event_number, Acknowledgement, PressKind, EVENT_COUNT, SECRET_HEADER};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tower_http::trace::TraceLayer;

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind
    pub bind: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Shared secret expected in `X-Matrix-Secret`
    pub secret: Option<String>,
    pub offline_timeout: Duration,
    pub liveness_interval: Duration,
    /// Service name reported by `/health`
    pub name: String,
    pub accept_reboot_reseed: bool,
}

impl ListenerConfig {
    /// Create a configuration with default timeouts, bound to localhost.
    pub fn new(port: u16) -> Self {
        Self::from_settings(&HostSettings {
            bind: "127.0.0.1".to_string(),
            port,
            ..HostSettings::default()
        })
    }

    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            bind: settings.bind.clone(),
            port: settings.port,
            secret: settings.secret.clone(),
            offline_timeout: settings.effective_offline_timeout(),
            liveness_interval: settings.liveness_interval,
            name: settings.name.clone(),
            accept_reboot_reseed: settings.accept_reboot_reseed,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Listener error types.
#[derive(Debug)]
pub enum ListenerError {
    /// Missing or mismatched shared secret
    Unauthorized,
    /// Body is not a relay message
    InvalidBody(String),
    /// Event number out of range or inconsistent with key/press
    InvalidEvent(String),
    /// Downstream consumer refused the event
    Sink(SinkError),
}

impl ListenerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ListenerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ListenerError::InvalidBody(_) | ListenerError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            ListenerError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ListenerError::Unauthorized => "UNAUTHORIZED",
            ListenerError::InvalidBody(_) => "INVALID_BODY",
            ListenerError::InvalidEvent(_) => "INVALID_EVENT",
            ListenerError::Sink(_) => "SINK_ERROR",
        }
    }

    fn to_error_response(self) -> (StatusCode, Json<ErrorResponse>) {
        (
            self.status(),
            Json(ErrorResponse {
                ok: false,
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
    }
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Unauthorized => write!(f, "Unauthorized"),
            ListenerError::InvalidBody(msg) => write!(f, "Invalid body: {msg}"),
            ListenerError::InvalidEvent(msg) => write!(f, "Invalid event: {msg}"),
            ListenerError::Sink(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Relay message as received. Everything but `event` is optional so that
/// older senders without identity or sequence are still accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub event: i64,
    #[serde(default)]
    pub seq: Option<u32>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub key: Option<i64>,
    #[serde(default)]
    pub press: Option<String>,
    #[serde(default)]
    pub held_ms: Option<u64>,
    #[serde(default)]
    pub uptime_ms: Option<u64>,
    #[serde(default)]
    pub rssi: Option<i32>,
}

impl InboundEvent {
    /// Check the event number and any redundant key/press fields.
    pub fn validate(&self) -> Result<(u8, PressKind), ListenerError> {
        let (key, press) = u8::try_from(self.event)
            .ok()
            .and_then(decode_event_number)
            .ok_or_else(|| {
                ListenerError::InvalidEvent(format!(
                    "event {} outside 0..{}",
                    self.event, EVENT_COUNT
                ))
            })?;

        if let Some(k) = self.key {
            if k != i64::from(key) {
                return Err(ListenerError::InvalidEvent(format!(
                    "key {k} does not match event {}",
                    self.event
                )));
            }
        }
        if let Some(p) = &self.press {
            if p != press.as_str() {
                return Err(ListenerError::InvalidEvent(format!(
                    "press {p:?} does not match event {}",
                    self.event
                )));
            }
        }
        Ok((key, press))
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub code: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub name: String,
    pub version: String,
}

/// Shared listener state
pub struct ListenerState {
    tracker: Mutex<DeviceTracker>,
    sink: Arc<dyn EventSink>,
    stats: ListenerStats,
    secret: Option<String>,
    name: String,
}

impl ListenerState {
    pub fn new(config: &ListenerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            tracker: Mutex::new(DeviceTracker::new(
                config.offline_timeout,
                config.accept_reboot_reseed,
            )),
            sink,
            stats: ListenerStats::new(),
            secret: config.secret.clone(),
            name: config.name.clone(),
        }
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn devices(&self) -> Vec<DeviceStatus> {
        self.tracker().statuses()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceStatus> {
        self.tracker().status(device_id)
    }

    /// Compare the secret header byte for byte.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ListenerError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        match headers.get(SECRET_HEADER) {
            Some(value) if value.as_bytes() == secret.as_bytes() => Ok(()),
            _ => Err(ListenerError::Unauthorized),
        }
    }

    /// Dedup, emit and commit one validated message.
    ///
    /// The sequence is committed only after the sink accepted the event.
    pub fn process(
        &self,
        message: &InboundEvent,
        key: u8,
        press: PressKind,
        now: DateTime<Utc>,
    ) -> Result<Acknowledgement, ListenerError> {
        let mut tracker = self.tracker();
        let device_id = message.device_id();
        let verdict = tracker.check(device_id, message.seq, message.uptime_ms, now);

        if verdict.should_process() {
            let event = HostEvent::Key(KeyEvent {
                device_id: device_id.map(str::to_string),
                seq: message.seq,
                event: event_number(key, press),
                key,
                press,
                held_ms: message.held_ms,
                received_at: now,
            });
            self.sink.emit(&event).map_err(ListenerError::Sink)?;

            if let (Some(id), Some(seq)) = (device_id, message.seq) {
                tracker.commit(id, seq, message.uptime_ms, now);
            }
            if verdict == SeqVerdict::Reseeded {
                tracing::info!(device_id = device_id.unwrap_or("-"), "device restarted, sequence reseeded");
            }
            self.stats.record_accepted();
        } else {
            tracing::debug!(
                device_id = device_id.unwrap_or("-"),
                seq = ?message.seq,
                "duplicate acknowledged"
            );
            self.stats.record_duplicate();
        }

        let conn_id = device_id.unwrap_or(ANONYMOUS_DEVICE);
        if let Some(change) = tracker.observe(conn_id, message.rssi, now) {
            self.emit_connectivity(change);
        }

        Ok(Acknowledgement {
            ok: true,
            seq: message.seq,
            duplicate: !verdict.should_process(),
        })
    }

    /// Demote silent devices and emit the resulting changes.
    pub fn check_liveness(&self, now: DateTime<Utc>) -> Vec<ConnectivityChange> {
        let changes = self.tracker().check_liveness(now);
        for change in &changes {
            tracing::warn!(device_id = %change.device_id, "device offline");
            self.emit_connectivity(change.clone());
        }
        changes
    }

    fn emit_connectivity(&self, change: ConnectivityChange) {
        self.stats.record_connectivity_change();
        if let Err(e) = self.sink.emit(&HostEvent::Connectivity(change)) {
            tracing::warn!("Failed to emit connectivity change: {}", e);
        }
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, DeviceTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// GET /health
async fn health(State(state): State<Arc<ListenerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        name: state.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /devices
async fn devices(State(state): State<Arc<ListenerState>>) -> Json<Vec<DeviceStatus>> {
    Json(state.devices())
}

/// GET /stats
async fn stats(State(state): State<Arc<ListenerState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// POST /event
async fn event(
    State(state): State<Arc<ListenerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Acknowledgement>, (StatusCode, Json<ErrorResponse>)> {
    handle_event(&state, &headers, &body).map(Json).map_err(|e| {
        match &e {
            ListenerError::Unauthorized => state.stats.record_unauthorized(),
            ListenerError::InvalidBody(_) | ListenerError::InvalidEvent(_) => {
                state.stats.record_invalid()
            }
            ListenerError::Sink(_) => {
                state.stats.record_failed();
                tracing::error!("Event processing failed: {}", e);
            }
        }
        tracing::warn!(code = e.code(), "event rejected: {e}");
        e.to_error_response()
    })
}

fn handle_event(
    state: &ListenerState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Acknowledgement, ListenerError> {
    state.authorize(headers)?;
    let message: InboundEvent =
        serde_json::from_slice(body).map_err(|e| ListenerError::InvalidBody(e.to_string()))?;
    let (key, press) = message.validate()?;
    state.process(&message, key, press, Utc::now())
}

pub fn router(state: Arc<ListenerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(devices))
        .route("/stats", get(stats))
        .route("/event", post(event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the listener and its liveness check until the returned sender fires.
pub async fn run(
    config: ListenerConfig,
    state: Arc<ListenerState>,
) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let app = router(state.clone());

    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Host listener listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        let _ = shutdown_rx.await;
        tracing::info!("Listener shutdown signal received");
        let _ = stop_tx.send(true);
    });

    let mut liveness_stop = stop_rx.clone();
    let liveness_state = state.clone();
    let interval = config.liveness_interval.max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = liveness_stop.changed() => break,
                _ = ticker.tick() => {
                    liveness_state.check_liveness(Utc::now());
                }
            }
        }
    });

    let mut server_stop = stop_rx;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_stop.changed().await;
            })
            .await
        {
            tracing::error!("Listener error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sink::MemorySink;

    fn inbound(json: &str) -> InboundEvent {
        serde_json::from_str(json).unwrap()
    }

    fn state_with(sink: Arc<MemorySink>, secret: Option<&str>) -> ListenerState {
        let mut config = ListenerConfig::new(0);
        config.secret = secret.map(str::to_string);
        ListenerState::new(&config, sink)
    }

    #[test]
    fn test_validate_event_range() {
        assert_eq!(inbound(r#"{"event":0}"#).validate().unwrap(), (0, PressKind::Short));
        assert_eq!(inbound(r#"{"event":71}"#).validate().unwrap(), (35, PressKind::Long));
        assert!(matches!(
            inbound(r#"{"event":72}"#).validate(),
            Err(ListenerError::InvalidEvent(_))
        ));
        assert!(matches!(
            inbound(r#"{"event":-1}"#).validate(),
            Err(ListenerError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_validate_consistency() {
        let ok = inbound(r#"{"event":40,"key":4,"press":"long"}"#);
        assert_eq!(ok.validate().unwrap(), (4, PressKind::Long));

        let wrong_key = inbound(r#"{"event":40,"key":5,"press":"long"}"#);
        assert!(wrong_key.validate().is_err());

        let wrong_press = inbound(r#"{"event":40,"key":4,"press":"short"}"#);
        assert!(wrong_press.validate().is_err());
    }

    #[test]
    fn test_secret_is_case_sensitive() {
        let state = state_with(Arc::new(MemorySink::new()), Some("abc"));

        let mut headers = HeaderMap::new();
        assert!(state.authorize(&headers).is_err());

        headers.insert(SECRET_HEADER, "ABC".parse().unwrap());
        assert!(matches!(state.authorize(&headers), Err(ListenerError::Unauthorized)));

        headers.insert(SECRET_HEADER, "abc".parse().unwrap());
        assert!(state.authorize(&headers).is_ok());
    }

    #[test]
    fn test_duplicate_not_reemitted() {
        let sink = Arc::new(MemorySink::new());
        let state = state_with(sink.clone(), None);
        let msg = inbound(r#"{"event":4,"seq":5,"deviceId":"D","uptimeMs":100}"#);

        for _ in 0..3 {
            let ack = state.process(&msg, 4, PressKind::Short, Utc::now()).unwrap();
            assert_eq!(ack.seq, Some(5));
        }
        assert_eq!(sink.key_events().len(), 1);
        assert_eq!(sink.connectivity_changes().len(), 1);
        assert_eq!(state.stats().snapshot().duplicates, 2);
        assert_eq!(state.device("D").unwrap().last_processed_seq, 5);
    }

    #[test]
    fn test_anonymous_sender_always_processed() {
        let sink = Arc::new(MemorySink::new());
        let state = state_with(sink.clone(), None);
        let msg = inbound(r#"{"event":1}"#);

        state.process(&msg, 1, PressKind::Short, Utc::now()).unwrap();
        state.process(&msg, 1, PressKind::Short, Utc::now()).unwrap();
        assert_eq!(sink.key_events().len(), 2);
        assert!(state.device(ANONYMOUS_DEVICE).unwrap().connected);
    }

    #[test]
    fn test_device_named_anonymous_is_separate() {
        let sink = Arc::new(MemorySink::new());
        let state = state_with(sink.clone(), None);
        let now = Utc::now();

        state.process(&inbound(r#"{"event":1}"#), 1, PressKind::Short, now).unwrap();
        let named = inbound(r#"{"event":1,"seq":3,"deviceId":"anonymous","rssi":-50}"#);
        state.process(&named, 1, PressKind::Short, now).unwrap();

        // Both came online on their own record.
        assert_eq!(sink.connectivity_changes().len(), 2);
        assert_eq!(state.devices().len(), 2);
        assert_eq!(state.device("anonymous").unwrap().last_processed_seq, 3);
        assert_eq!(state.device(ANONYMOUS_DEVICE).unwrap().last_rssi, None);

        // An empty id is the same as no id.
        state.process(&inbound(r#"{"event":1,"seq":1,"deviceId":""}"#), 1, PressKind::Short, now).unwrap();
        assert_eq!(state.devices().len(), 2);
        assert_eq!(state.device(ANONYMOUS_DEVICE).unwrap().last_processed_seq, 0);
    }

    #[test]
    fn test_liveness_emits_offline() {
        let sink = Arc::new(MemorySink::new());
        let state = state_with(sink.clone(), None);
        let now = Utc::now();
        let msg = inbound(r#"{"event":2,"seq":1,"deviceId":"D"}"#);
        state.process(&msg, 2, PressKind::Short, now).unwrap();

        let changes = state.check_liveness(now + chrono::Duration::seconds(31));
        assert_eq!(changes.len(), 1);
        assert!(state.check_liveness(now + chrono::Duration::seconds(40)).is_empty());

        let seen = sink.connectivity_changes();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].connected);
        assert!(!seen[1].connected);
    }
}
