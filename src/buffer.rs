/*
 * This file is part of Kilnwatch.
 *
 * Copyright (C) 2025 Kilnwatch contributors
 *
 * Kilnwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Kilnwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Kilnwatch. If not, see <https://www.gnu.org/licenses/>.
 */

/// Number of recent samples retained. Two is enough for the detector to
/// reason about "current" versus "previous" when debugging transitions.
pub const SAMPLE_DEPTH: usize = 2;

/// Fixed-size circular buffer of recent temperature readings (Celsius).
///
/// All slots are zero-initialized, so `current()` reads 0.0 until the
/// first real sample arrives. Only the sampling loop ever writes here.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    slots: [f64; SAMPLE_DEPTH],
    idx: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self { slots: [0.0; SAMPLE_DEPTH], idx: 0 }
    }

    /// Reset all slots to 0 and the write index to 0.
    pub fn clear(&mut self) {
        self.slots = [0.0; SAMPLE_DEPTH];
        self.idx = 0;
    }

    /// Advance the write index circularly and overwrite that slot.
    pub fn push(&mut self, value: f64) {
        self.idx = (self.idx + 1) % SAMPLE_DEPTH;
        self.slots[self.idx] = value;
    }

    /// Most recently pushed value (0.0 if nothing has been pushed).
    pub fn current(&self) -> f64 {
        self.slots[self.idx]
    }

    /// The value pushed before the current one.
    pub fn previous(&self) -> f64 {
        self.slots[(self.idx + SAMPLE_DEPTH - 1) % SAMPLE_DEPTH]
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}
