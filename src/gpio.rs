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

//! Sysfs GPIO lines (`/sys/class/gpio`), addressed by BCM line number.
//!
//! Every access opens the value file fresh, so a line handle stays
//! valid across sensor power cycles. Lines are left exported on drop;
//! re-exporting an exported pin is a no-op here.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::hw::{IndicatorLine, InputLine, ResetLine};

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Highest BCM line number on the 40-pin header.
pub const MAX_BCM_PIN: u8 = 27;

fn pin_dir(pin: u8) -> PathBuf {
    PathBuf::from(GPIO_ROOT).join(format!("gpio{}", pin))
}

fn value_path(pin: u8) -> PathBuf {
    pin_dir(pin).join("value")
}

fn export(pin: u8) -> io::Result<()> {
    if pin_dir(pin).exists() {
        return Ok(());
    }
    fs::write(PathBuf::from(GPIO_ROOT).join("export"), pin.to_string())?;
    // The attribute files appear asynchronously after export on some
    // kernels; wait briefly for the directory to materialize.
    for _ in 0..20 {
        if pin_dir(pin).join("direction").exists() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn set_direction(pin: u8, dir: &str) -> io::Result<()> {
    fs::write(pin_dir(pin).join("direction"), dir)
}

/// An exported output line.
#[derive(Debug)]
pub struct OutputPin {
    pin: u8,
}

impl OutputPin {
    pub fn open(pin: u8) -> io::Result<Self> {
        export(pin)?;
        set_direction(pin, "out")?;
        let line = Self { pin };
        line.write(false)?;
        Ok(line)
    }

    pub fn write(&self, high: bool) -> io::Result<()> {
        fs::write(value_path(self.pin), if high { "1" } else { "0" })
    }
}

impl IndicatorLine for OutputPin {
    fn set(&self, on: bool) -> io::Result<()> {
        self.write(on)
    }
}

impl ResetLine for OutputPin {
    fn assert_reset(&mut self) -> io::Result<()> {
        self.write(true)
    }

    fn release_reset(&mut self) -> io::Result<()> {
        self.write(false)
    }
}

/// An exported input line.
#[derive(Debug)]
pub struct InputPin {
    pin: u8,
}

impl InputPin {
    pub fn open(pin: u8) -> io::Result<Self> {
        export(pin)?;
        set_direction(pin, "in")?;
        Ok(Self { pin })
    }

    pub fn read(&self) -> io::Result<bool> {
        let raw = fs::read_to_string(value_path(self.pin))?;
        Ok(raw.trim() == "1")
    }
}

impl InputLine for InputPin {
    fn is_high(&self) -> io::Result<bool> {
        self.read()
    }
}
