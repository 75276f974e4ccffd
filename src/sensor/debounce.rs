//! Per-key time-based debounce.
//!
//! Every raw change restarts the key's timer. A raw value becomes the stable
//! value only after it has held for the whole debounce window, and a
//! transition is emitted only if that changes the stable value.

use crate::types::{Transition, TransitionKind, COLS, ROWS};

/// Default debounce window.
pub const DEBOUNCE_MS: u64 = 15;

/// Physical matrix snapshot, `true` = pressed.
pub type KeyState = [[bool; COLS]; ROWS];

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    raw: bool,
    stable: bool,
    changed_at_ms: u64,
}

pub struct Debouncer {
    cells: [[Cell; COLS]; ROWS],
    window_ms: u64,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            cells: [[Cell::default(); COLS]; ROWS],
            window_ms,
        }
    }

    /// Adopt a snapshot as both raw and stable state without emitting anything.
    pub fn seed(&mut self, state: &KeyState, now_ms: u64) {
        for (row, cells) in self.cells.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                *cell = Cell {
                    raw: state[row][col],
                    stable: state[row][col],
                    changed_at_ms: now_ms,
                };
            }
        }
    }

    /// Feed one scan and collect the transitions it settles, in scan order.
    pub fn update(&mut self, state: &KeyState, now_ms: u64) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for row in 0..ROWS {
            for col in 0..COLS {
                let cell = &mut self.cells[row][col];
                let sample = state[row][col];

                if sample != cell.raw {
                    cell.raw = sample;
                    cell.changed_at_ms = now_ms;
                    continue;
                }

                if cell.raw != cell.stable
                    && now_ms.saturating_sub(cell.changed_at_ms) >= self.window_ms
                {
                    cell.stable = cell.raw;
                    let kind = if cell.stable {
                        TransitionKind::Press
                    } else {
                        TransitionKind::Release
                    };
                    transitions.push(Transition {
                        key: (row * COLS + col) as u8,
                        kind,
                    });
                }
            }
        }

        transitions
    }

    /// Current debounced state of a cell.
    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.cells[row][col].stable
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_MS)
    }
}
