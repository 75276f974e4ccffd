//! Listener counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Request and connectivity counters for the running listener.
#[derive(Debug)]
pub struct ListenerStats {
    /// Messages processed and emitted downstream
    accepted: AtomicU64,
    /// Messages re-acknowledged without reprocessing
    duplicates: AtomicU64,
    /// Requests with a missing or wrong secret
    unauthorized: AtomicU64,
    /// Malformed bodies and invalid event numbers
    invalid: AtomicU64,
    /// Requests that failed while processing
    failed: AtomicU64,
    /// Online/offline transitions
    connectivity_changes: AtomicU64,
    started_at: DateTime<Utc>,
}

impl ListenerStats {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            connectivity_changes: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthorized(&self) {
        self.unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connectivity_change(&self) {
        self.connectivity_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            connectivity_changes: self.connectivity_changes.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Listener Statistics:\n\
             - Events accepted: {}\n\
             - Duplicates acknowledged: {}\n\
             - Unauthorized requests: {}\n\
             - Invalid requests: {}\n\
             - Failed requests: {}\n\
             - Connectivity changes: {}\n\
             - Uptime: {} seconds",
            stats.accepted,
            stats.duplicates,
            stats.unauthorized,
            stats.invalid,
            stats.failed,
            stats.connectivity_changes,
            stats.uptime_secs
        )
    }
}

impl Default for ListenerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of listener statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub duplicates: u64,
    pub unauthorized: u64,
    pub invalid: u64,
    pub failed: u64,
    pub connectivity_changes: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}
