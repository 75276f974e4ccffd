//! Keyrelay - key matrix press capture with reliable relay to a host.
//!
//! A sensor device scans a switch matrix and streams debounced transitions
//! over a byte link to a gateway device. The gateway classifies each press
//! as short or long and relays the outcome to a host listener over HTTP,
//! which deduplicates by per-device sequence and tracks device liveness.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   link frames   ┌───────────────────┐   POST /event   ┌───────────────────┐
//! │    Sensor     │────────────────▶│      Gateway      │────────────────▶│   Host listener   │
//! │ scan+debounce │                 │ classify ─▶ relay │◀───── ack ──────│ auth ─▶ dedup     │
//! └───────────────┘                 │ boot: reset, mode │                 │ liveness ─▶ sink  │
//!                                   └───────────────────┘                 └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use keyrelay::gateway::PressClassifier;
//! use keyrelay::link::FrameDecoder;
//! use keyrelay::types::{PressKind, Transition};
//!
//! let bytes = keyrelay::link::encode_transitions(&[Transition::press(4), Transition::release(4)]);
//! let mut decoder = FrameDecoder::new();
//! let mut classifier = PressClassifier::default();
//!
//! let mut outcome = None;
//! for (i, t) in decoder.feed(&bytes).into_iter().enumerate() {
//!     outcome = classifier.on_transition(t, i as u64 * 900);
//! }
//! let outcome = outcome.unwrap();
//! assert_eq!(outcome.kind, PressKind::Long);
//! assert_eq!(outcome.event_number(), 40);
//! ```

pub mod config;
pub mod gateway;
pub mod host;
pub mod link;
pub mod sensor;
pub mod types;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, GatewaySettings, HostSettings};
pub use gateway::{PressClassifier, ReliabilityMode, Telemetry};
pub use host::{DeviceTracker, EventSink, HostEvent, SeqVerdict};
pub use link::{FrameDecoder, LinkFrame};
pub use sensor::{SensorDevice, SimulatedMatrix};
pub use types::{PressKind, PressOutcome, RelayMessage, Transition, TransitionKind};

#[cfg(feature = "gateway")]
pub use gateway::relay::{RelayClient, RelayConfig, RelayError};

#[cfg(feature = "host")]
pub use host::listener::{ListenerConfig, ListenerState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
