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

/// Whether a fire is currently considered burning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireState {
    Idle,
    Active,
}

/// A state transition produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireEdge {
    /// Idle -> Active. The one edge that should trigger an alert.
    Ignition,
    /// Active -> Idle. Silent.
    Extinguished,
}

/// Two-threshold fire state machine.
///
/// Rises to `Active` when a sample exceeds `thresh`, falls back to
/// `Idle` only when a sample drops below `off_thresh`. The band between
/// the two thresholds prevents alert flapping when the temperature
/// hovers near a single cutoff.
///
/// Requires `off_thresh < thresh`; config validation rejects anything
/// else before a detector is ever constructed.
#[derive(Debug)]
pub struct HysteresisDetector {
    state: FireState,
    thresh: f64,
    off_thresh: f64,
}

impl HysteresisDetector {
    pub fn new(thresh: f64, off_thresh: f64) -> Self {
        Self { state: FireState::Idle, thresh, off_thresh }
    }

    /// Evaluate one sample, returning the state after evaluation and
    /// the edge taken, if any. `Ignition` is reported exactly once per
    /// Idle -> Active transition; staying above `thresh` while already
    /// `Active` produces no edge.
    pub fn evaluate(&mut self, sample: f64) -> (FireState, Option<FireEdge>) {
        let edge = match self.state {
            FireState::Idle if sample > self.thresh => {
                self.state = FireState::Active;
                Some(FireEdge::Ignition)
            }
            FireState::Active if sample < self.off_thresh => {
                self.state = FireState::Idle;
                Some(FireEdge::Extinguished)
            }
            _ => None,
        };
        (self.state, edge)
    }

    pub fn state(&self) -> FireState {
        self.state
    }
}
