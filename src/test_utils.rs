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

//! Hand-rolled driver fakes for supervisor-level tests. The mockall
//! mocks on the hardware traits cover call-sequence assertions; these
//! fakes are for multi-threaded tests where the test keeps shared
//! handles into state the supervisor owns.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::hw::{AlertSink, IndicatorLine, ResetLine, TemperatureSensor};

/// Replays a fixed reading script, then repeats the last value. The
/// shared `ready` and `fail_ready` flags let a test starve or break
/// the sensor mid-run.
pub struct ScriptedSensor {
    pub readings: Arc<Mutex<VecDeque<f64>>>,
    pub ready: Arc<AtomicBool>,
    pub fail_ready: Arc<AtomicBool>,
    pub reconfigures: Arc<AtomicUsize>,
    last: f64,
}

impl ScriptedSensor {
    pub fn new(script: &[f64]) -> Self {
        Self {
            readings: Arc::new(Mutex::new(script.iter().copied().collect())),
            ready: Arc::new(AtomicBool::new(true)),
            fail_ready: Arc::new(AtomicBool::new(false)),
            reconfigures: Arc::new(AtomicUsize::new(0)),
            last: 0.0,
        }
    }
}

impl TemperatureSensor for ScriptedSensor {
    fn read_temperature(&mut self) -> io::Result<f64> {
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }

    fn is_data_ready(&mut self) -> io::Result<bool> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "drdy line read failed"));
        }
        Ok(self.ready.load(Ordering::SeqCst))
    }

    fn reconfigure(&mut self) -> io::Result<()> {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every `set` call and mirrors the latest level.
#[derive(Clone, Default)]
pub struct RecordingIndicator {
    pub state: Arc<AtomicBool>,
    pub history: Arc<Mutex<Vec<bool>>>,
}

impl IndicatorLine for RecordingIndicator {
    fn set(&self, on: bool) -> io::Result<()> {
        self.state.store(on, Ordering::SeqCst);
        self.history.lock().unwrap().push(on);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CountingReset {
    pub asserts: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl ResetLine for CountingReset {
    fn assert_reset(&mut self) -> io::Result<()> {
        self.asserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_reset(&mut self) -> io::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CountingAlert {
    pub count: Arc<AtomicUsize>,
}

impl AlertSink for CountingAlert {
    fn alert(&mut self) -> io::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
