//! Host process: accepts relayed events, deduplicates them per device,
//! tracks device connectivity and hands domain events to a sink.

pub mod sink;
pub mod stats;
pub mod tracker;

#[cfg(feature = "host")]
pub mod listener;

pub use sink::{ChannelSink, ConnectivityChange, EventSink, HostEvent, KeyEvent, LogSink, MemorySink, SinkError};
pub use stats::{ListenerStats, StatsSnapshot};
pub use tracker::{DeviceStatus, DeviceTracker, SeqVerdict, ANONYMOUS_DEVICE};

#[cfg(feature = "host")]
pub use listener::{ListenerConfig, ListenerError, ListenerState};
