//! Gateway device: receives transitions from the link, classifies presses
//! and relays the outcomes to the host listener.
//!
//! # Boot sequence
//!
//! ```text
//! power-on ──▶ reset window ──▶ mode selection ──▶ classify + relay
//!                   │
//!                   └──▶ factory reset (credentials cleared, restart)
//! ```

pub mod boot;
pub mod classifier;
pub mod mode;
pub mod screen;
pub mod telemetry;

#[cfg(feature = "gateway")]
pub mod api;
#[cfg(feature = "gateway")]
pub mod relay;
#[cfg(feature = "gateway")]
pub mod runtime;

pub use boot::{ModeSelector, ResetDetector, ResetStatus};
pub use classifier::PressClassifier;
pub use mode::{AckRejection, ReliabilityMode};
pub use screen::{LogScreen, Screen};
pub use telemetry::{Telemetry, TelemetrySnapshot};

use std::path::{Path, PathBuf};

/// File under the data path holding the persisted device identifier.
pub const DEVICE_ID_FILE: &str = "device_id";
/// File under the data path holding persisted network credentials.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Per-boot message sequence, starting at 1.
///
/// Advanced once per classified release whether or not the delivery succeeds.
#[derive(Debug)]
pub struct SequenceCounter {
    last: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }

    /// Last value handed out, 0 before the first.
    pub fn last(&self) -> u32 {
        self.last
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the device identifier from `data_path`, creating it on first boot.
pub fn load_or_create_device_id(data_path: &Path) -> std::io::Result<String> {
    let path = data_path.join(DEVICE_ID_FILE);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let device_id = format!("gw-{}-{}", hostname, &uuid::Uuid::new_v4().simple().to_string()[..8]);

    std::fs::create_dir_all(data_path)?;
    std::fs::write(&path, &device_id)?;
    tracing::info!(%device_id, "generated device identifier");
    Ok(device_id)
}

/// Actions the boot sequence may trigger on the device.
pub trait DeviceActions: Send + Sync {
    /// Clear persisted network credentials. The caller restarts afterwards.
    fn factory_reset(&self) -> std::io::Result<()>;
}

/// Credentials stored as a file under the data path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(data_path: &Path) -> Self {
        Self {
            path: data_path.join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl DeviceActions for CredentialStore {
    fn factory_reset(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::warn!(path = ?self.path, "credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
