//! Boot-time checkpoints: factory-reset window and reliability-mode selection.
//!
//! Both are driven by the same transitions the classifier sees, before the
//! classifier is started.

use super::mode::ReliabilityMode;
use crate::types::{Transition, TransitionKind};

/// Length of the factory-reset window after power-on.
pub const RESET_WINDOW_MS: u64 = 2_500;
/// Continuous hold needed on the reset key.
pub const RESET_HOLD_MS: u64 = 1_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    /// Window still open, no reset yet
    Watching,
    /// Reset key held long enough: clear credentials and restart
    Reset,
    /// Window closed without a reset
    Elapsed,
}

/// Watches the reset key during the boot window.
///
/// The hold must complete inside the window. Once a reset is detected the
/// status stays `Reset`.
pub struct ResetDetector {
    reset_key: u8,
    window_end_ms: u64,
    hold_ms: u64,
    held_since_ms: Option<u64>,
    triggered: bool,
}

impl ResetDetector {
    pub fn new(reset_key: u8, boot_ms: u64, window_ms: u64, hold_ms: u64) -> Self {
        Self {
            reset_key,
            window_end_ms: boot_ms + window_ms,
            hold_ms,
            held_since_ms: None,
            triggered: false,
        }
    }

    pub fn window_end_ms(&self) -> u64 {
        self.window_end_ms
    }

    pub fn on_transition(&mut self, transition: Transition, now_ms: u64) -> ResetStatus {
        if transition.key != self.reset_key {
            tracing::debug!(key = transition.key, "key activity during reset window");
            return self.poll(now_ms);
        }

        match transition.kind {
            TransitionKind::Press => {
                if self.held_since_ms.is_none() && now_ms < self.window_end_ms {
                    self.held_since_ms = Some(now_ms);
                }
            }
            TransitionKind::Release => {
                self.evaluate(now_ms);
                self.held_since_ms = None;
            }
        }
        self.poll(now_ms)
    }

    pub fn poll(&mut self, now_ms: u64) -> ResetStatus {
        self.evaluate(now_ms);
        if self.triggered {
            ResetStatus::Reset
        } else if now_ms >= self.window_end_ms {
            ResetStatus::Elapsed
        } else {
            ResetStatus::Watching
        }
    }

    fn evaluate(&mut self, now_ms: u64) {
        if let Some(since) = self.held_since_ms {
            let hold_done_at = since + self.hold_ms;
            if now_ms >= hold_done_at && hold_done_at <= self.window_end_ms {
                self.triggered = true;
            }
        }
    }
}

/// Blocks normal operation until the operator picks a reliability mode.
///
/// There is no timeout and no default.
pub struct ModeSelector {
    legacy_key: u8,
    confirmed_key: u8,
}

impl ModeSelector {
    pub fn new(legacy_key: u8, confirmed_key: u8) -> Self {
        Self {
            legacy_key,
            confirmed_key,
        }
    }

    /// Prompt shown while waiting for a choice.
    pub fn prompt(&self) -> String {
        format!(
            "Select mode: key {} = legacy, key {} = confirmed",
            self.legacy_key, self.confirmed_key
        )
    }

    pub fn on_transition(&self, transition: Transition) -> Option<ReliabilityMode> {
        if !transition.is_press() {
            return None;
        }
        if transition.key == self.legacy_key {
            Some(ReliabilityMode::Legacy)
        } else if transition.key == self.confirmed_key {
            Some(ReliabilityMode::Confirmed)
        } else {
            None
        }
    }
}
