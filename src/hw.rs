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

//! Driver traits at the hardware seam.
//!
//! The supervisor consumes these as boxed trait objects, so the
//! monitoring core never touches GPIO, SPI, or audio directly and
//! tests can substitute scripted implementations.

use std::io;

/// Thermocouple amplifier as seen by the sampling loop.
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSensor: Send {
    /// Latest converted temperature in degrees Celsius.
    fn read_temperature(&mut self) -> io::Result<f64>;

    /// Whether a fresh conversion result is available to read.
    fn is_data_ready(&mut self) -> io::Result<bool>;

    /// Rewrite the sensor's control registers after a power cycle.
    fn reconfigure(&mut self) -> io::Result<()>;
}

/// Reset line used to power-cycle a stuck sensor.
#[cfg_attr(test, mockall::automock)]
pub trait ResetLine: Send {
    fn assert_reset(&mut self) -> io::Result<()>;
    fn release_reset(&mut self) -> io::Result<()>;
}

/// A single status output (heartbeat LED, fault LED).
///
/// `Sync` because the fault line is shared between the sampling loop
/// and the control listener.
#[cfg_attr(test, mockall::automock)]
pub trait IndicatorLine: Send + Sync {
    fn set(&self, on: bool) -> io::Result<()>;
}

/// A single digital input (data-ready, sound-enable switch).
#[cfg_attr(test, mockall::automock)]
pub trait InputLine: Send {
    fn is_high(&self) -> io::Result<bool>;
}

/// Destination for the one-shot ignition alert.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send {
    fn alert(&mut self) -> io::Result<()>;
}
