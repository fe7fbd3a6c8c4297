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

//! Kilnwatch - fire/kiln monitor daemon for single-board computers
//!
//! This library provides the monitoring core: a hysteresis-based fire
//! detector fed by a MAX31856 thermocouple amplifier, a data-ready fault
//! monitor with power-cycle recovery, and a supervisor coordinating the
//! sampling, heartbeat, and control-listener threads over one shared
//! run flag.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod control;
pub mod detector;
pub mod fault;
pub mod gpio;
pub mod heartbeat;
pub mod hw;
pub mod logger;
pub mod max31856;
pub mod supervisor;

#[cfg(test)]
pub mod test_utils;
