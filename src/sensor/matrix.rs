//! Key matrix scanning.
//!
//! The scan drives one output line low at a time, waits for the lines to
//! settle, and samples every input line. On the reference board the driven
//! lines are wired to physical rows and the sampled lines to physical
//! columns, so a sample at (scan row `r`, scan column `c`) lands at physical
//! `[c][r]` and the key index is `c * COLS + r`.

use super::debounce::KeyState;
use crate::types::{COLS, ROWS};
use std::time::Duration;

/// Settle time between driving a line and sampling the inputs.
pub const SETTLE_TIME: Duration = Duration::from_micros(30);

/// Hardware access for one matrix.
///
/// Implementations wrap the GPIO driver of the board; inputs are active low
/// with pull-ups, so a pressed switch on the driven line reads as a cleared bit.
pub trait MatrixIo {
    /// Drive scan column `col` low and release every other column.
    fn select_column(&mut self, col: usize);
    /// Sample the row inputs. Bit `r` is the level of scan row `r`.
    fn read_rows(&mut self) -> u8;
    /// Release every column (all high).
    fn release_all(&mut self);
    /// Wait for the lines to settle after a column change.
    fn settle(&mut self) {
        std::thread::sleep(SETTLE_TIME);
    }
}

/// Drives a [`MatrixIo`] and produces physical key snapshots.
pub struct MatrixScanner<M> {
    io: M,
}

impl<M: MatrixIo> MatrixScanner<M> {
    pub fn new(io: M) -> Self {
        Self { io }
    }

    /// Scan every cell once. Returns `true` for pressed keys in physical layout.
    pub fn scan(&mut self) -> KeyState {
        let mut state = [[false; COLS]; ROWS];

        for scan_col in 0..COLS {
            self.io.select_column(scan_col);
            self.io.settle();
            let levels = self.io.read_rows();

            for scan_row in 0..ROWS {
                // Active low: a cleared bit is a closed switch.
                let pressed = (levels >> scan_row) & 1 == 0;
                state[scan_col][scan_row] = pressed;
            }
        }

        self.io.release_all();
        state
    }

    pub fn io_mut(&mut self) -> &mut M {
        &mut self.io
    }
}

/// Physical key index of a scan coordinate.
pub fn key_index(scan_row: usize, scan_col: usize) -> u8 {
    (scan_col * COLS + scan_row) as u8
}

/// In-memory matrix for tests and simulation.
///
/// Keys are set by physical index; reads honour the same axis swap as the
/// real wiring.
#[derive(Debug, Default, Clone)]
pub struct SimulatedMatrix {
    pressed: [[bool; COLS]; ROWS],
    selected: Option<usize>,
}

impl SimulatedMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, key: u8, pressed: bool) {
        let key = key as usize;
        self.pressed[key / COLS][key % COLS] = pressed;
    }
}

impl MatrixIo for SimulatedMatrix {
    fn select_column(&mut self, col: usize) {
        self.selected = Some(col);
    }

    fn read_rows(&mut self) -> u8 {
        let Some(scan_col) = self.selected else {
            return 0xFF;
        };
        let mut levels: u8 = 0xFF;
        for scan_row in 0..ROWS {
            if self.pressed[scan_col][scan_row] {
                levels &= !(1u8 << scan_row);
            }
        }
        levels
    }

    fn release_all(&mut self) {
        self.selected = None;
    }

    fn settle(&mut self) {}
}
