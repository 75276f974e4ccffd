//! Sensor device: matrix scanning, debounce and frame emission.
//!
//! The device runs one cooperative loop. Each call to [`SensorDevice::poll`]
//! performs one scan cycle and returns the link bytes for every transition
//! that settled during it.

pub mod debounce;
pub mod matrix;
pub mod script;

pub use debounce::{Debouncer, KeyState, DEBOUNCE_MS};
pub use matrix::{key_index, MatrixIo, MatrixScanner, SimulatedMatrix};
pub use script::{ScriptedPress, ScriptedSensor};

use crate::link::encode_transitions;
use crate::types::Transition;

pub struct SensorDevice<M> {
    scanner: MatrixScanner<M>,
    debouncer: Debouncer,
    seeded: bool,
}

impl<M: MatrixIo> SensorDevice<M> {
    pub fn new(io: M, debounce_ms: u64) -> Self {
        Self {
            scanner: MatrixScanner::new(io),
            debouncer: Debouncer::new(debounce_ms),
            seeded: false,
        }
    }

    /// Seed the debouncer from a first scan. Keys already held at boot do not
    /// produce transitions.
    pub fn init(&mut self, now_ms: u64) {
        let state = self.scanner.scan();
        self.debouncer.seed(&state, now_ms);
        self.seeded = true;
        tracing::debug!("matrix seeded");
    }

    /// Run one scan cycle and return the settled transitions.
    pub fn scan(&mut self, now_ms: u64) -> Vec<Transition> {
        if !self.seeded {
            self.init(now_ms);
            return Vec::new();
        }
        let state = self.scanner.scan();
        let transitions = self.debouncer.update(&state, now_ms);
        for t in &transitions {
            tracing::debug!(key = t.key, kind = ?t.kind, "transition");
        }
        transitions
    }

    /// Run one scan cycle and return the encoded frames for the link.
    pub fn poll(&mut self, now_ms: u64) -> Vec<u8> {
        encode_transitions(&self.scan(now_ms))
    }

    pub fn io_mut(&mut self) -> &mut M {
        self.scanner.io_mut()
    }
}
