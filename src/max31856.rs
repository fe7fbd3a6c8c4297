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

//! MAX31856 thermocouple amplifier driver.
//!
//! Register-level access over a [`SpiBus`] trait so the conversion
//! logic is testable without hardware; [`SpidevBus`] implements the
//! trait on top of `/dev/spidevX.Y`. The chip runs in automatic
//! conversion mode and signals a completed conversion on its
//! active-low DRDY output, which this driver reads through a GPIO
//! input line.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hw::{InputLine, TemperatureSensor};

// Register addresses. Writes set the top address bit.
const REG_CR0: u8 = 0x00;
const REG_CR1: u8 = 0x01;
const REG_MASK: u8 = 0x02;
const REG_LTCBH: u8 = 0x0C;
const WRITE_FLAG: u8 = 0x80;

// CR0 bits.
const CR0_AUTOCONVERT: u8 = 0x80;
const CR0_OCFAULT1: u8 = 0x10;
const CR0_FAULTCLR: u8 = 0x02;

// Mask every fault from the FAULT output pin; faults are still
// latched in the status register and cleared on reconfigure.
const MASK_ALL_FAULTS: u8 = 0xFF;

/// Linearized thermocouple temperature LSB, degrees Celsius.
const LTC_RESOLUTION: f64 = 0.007_812_5;

/// Thermocouple type, mapping to the CR1 TC-type nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TcType {
    B,
    E,
    J,
    #[default]
    K,
    N,
    R,
    S,
    T,
}

impl TcType {
    pub fn cr1_nibble(self) -> u8 {
        match self {
            TcType::B => 0x0,
            TcType::E => 0x1,
            TcType::J => 0x2,
            TcType::K => 0x3,
            TcType::N => 0x4,
            TcType::R => 0x5,
            TcType::S => 0x6,
            TcType::T => 0x7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TcType::B => "B",
            TcType::E => "E",
            TcType::J => "J",
            TcType::K => "K",
            TcType::N => "N",
            TcType::R => "R",
            TcType::S => "S",
            TcType::T => "T",
        }
    }

    /// Parse a `--type` argument. Case-insensitive single letter.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "B" => Some(TcType::B),
            "E" => Some(TcType::E),
            "J" => Some(TcType::J),
            "K" => Some(TcType::K),
            "N" => Some(TcType::N),
            "R" => Some(TcType::R),
            "S" => Some(TcType::S),
            "T" => Some(TcType::T),
            _ => None,
        }
    }
}

/// Full-duplex SPI transfer. `tx` and `rx` must be the same length.
pub trait SpiBus: Send {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;
}

/// MAX31856 over any [`SpiBus`], with DRDY on a GPIO input.
pub struct Max31856 {
    bus: Box<dyn SpiBus>,
    drdy: Box<dyn InputLine>,
    tc_type: TcType,
}

impl Max31856 {
    /// Construct and configure the chip: fault mask, thermocouple
    /// type, automatic conversion with open-circuit detection.
    pub fn new(bus: Box<dyn SpiBus>, drdy: Box<dyn InputLine>, tc_type: TcType) -> io::Result<Self> {
        let mut chip = Self { bus, drdy, tc_type };
        chip.configure()?;
        Ok(chip)
    }

    fn write_register(&mut self, reg: u8, value: u8) -> io::Result<()> {
        let tx = [reg | WRITE_FLAG, value];
        let mut rx = [0u8; 2];
        self.bus.transfer(&tx, &mut rx)
    }

    fn read_registers(&mut self, reg: u8, out: &mut [u8]) -> io::Result<()> {
        let mut tx = vec![0u8; out.len() + 1];
        tx[0] = reg & !WRITE_FLAG;
        let mut rx = vec![0u8; out.len() + 1];
        self.bus.transfer(&tx, &mut rx)?;
        out.copy_from_slice(&rx[1..]);
        Ok(())
    }

    fn configure(&mut self) -> io::Result<()> {
        self.write_register(REG_MASK, MASK_ALL_FAULTS)?;
        self.write_register(REG_CR1, self.tc_type.cr1_nibble())?;
        self.write_register(REG_CR0, CR0_AUTOCONVERT | CR0_OCFAULT1)
    }

    /// Decode the three linearized-temperature registers. 19-bit
    /// signed value, 7 fraction bits, left-justified in 24 bits.
    fn decode_temperature(raw: [u8; 3]) -> f64 {
        let mut v = (i32::from(raw[0]) << 16) | (i32::from(raw[1]) << 8) | i32::from(raw[2]);
        if v & 0x0080_0000 != 0 {
            v -= 0x0100_0000;
        }
        f64::from(v >> 5) * LTC_RESOLUTION
    }

    pub fn tc_type(&self) -> TcType {
        self.tc_type
    }
}

impl TemperatureSensor for Max31856 {
    fn read_temperature(&mut self) -> io::Result<f64> {
        let mut raw = [0u8; 3];
        self.read_registers(REG_LTCBH, &mut raw)?;
        Ok(Self::decode_temperature(raw))
    }

    fn is_data_ready(&mut self) -> io::Result<bool> {
        // DRDY is active low.
        Ok(!self.drdy.is_high()?)
    }

    fn reconfigure(&mut self) -> io::Result<()> {
        self.configure()?;
        // Clear any faults latched while the chip was wedged.
        self.write_register(REG_CR0, CR0_AUTOCONVERT | CR0_OCFAULT1 | CR0_FAULTCLR)
    }
}

// --- spidev ---------------------------------------------------------------

// SPI ioctl encoding, linux/spi/spidev.h. Magic 'k'.
const SPI_IOC_MAGIC: u64 = b'k' as u64;
const IOC_WRITE: u64 = 1;

fn spi_ioc_w(nr: u64, size: u64) -> libc::c_ulong {
    ((IOC_WRITE << 30) | (size << 16) | (SPI_IOC_MAGIC << 8) | nr) as libc::c_ulong
}

#[repr(C)]
#[derive(Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// MAX31856 talks SPI mode 1 (CPOL=0, CPHA=1), MSB first, up to 5 MHz.
const SPI_MODE_1: u8 = 0x01;
const SPI_BITS_PER_WORD: u8 = 8;
const SPI_SPEED_HZ: u32 = 500_000;

/// `/dev/spidevX.Y` bus using the kernel's chip select.
pub struct SpidevBus {
    file: File,
}

impl SpidevBus {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();
        ioctl_write(fd, spi_ioc_w(1, 1), &SPI_MODE_1 as *const u8 as *const libc::c_void)?;
        ioctl_write(fd, spi_ioc_w(3, 1), &SPI_BITS_PER_WORD as *const u8 as *const libc::c_void)?;
        ioctl_write(fd, spi_ioc_w(4, 4), &SPI_SPEED_HZ as *const u32 as *const libc::c_void)?;
        Ok(Self { file })
    }
}

fn ioctl_write(fd: libc::c_int, request: libc::c_ulong, arg: *const libc::c_void) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(fd, request, arg) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SpiBus for SpidevBus {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        if tx.len() != rx.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tx/rx length mismatch"));
        }
        let xfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            ..Default::default()
        };
        let request = spi_ioc_w(0, std::mem::size_of::<SpiIocTransfer>() as u64);
        ioctl_write(self.file.as_raw_fd(), request, &xfer as *const SpiIocTransfer as *const libc::c_void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every write and replays queued register reads.
    #[derive(Clone, Default)]
    struct ScriptedBus {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        reads: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl SpiBus for ScriptedBus {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
            assert_eq!(tx.len(), rx.len());
            if tx[0] & WRITE_FLAG != 0 {
                self.writes.lock().unwrap().push(tx.to_vec());
            } else {
                let mut reads = self.reads.lock().unwrap();
                if !reads.is_empty() {
                    let payload = reads.remove(0);
                    rx[1..1 + payload.len()].copy_from_slice(&payload);
                }
            }
            Ok(())
        }
    }

    struct FixedLine(bool);

    impl InputLine for FixedLine {
        fn is_high(&self) -> io::Result<bool> {
            Ok(self.0)
        }
    }

    fn new_chip(bus: ScriptedBus, tc: TcType) -> Max31856 {
        Max31856::new(Box::new(bus), Box::new(FixedLine(false)), tc).unwrap()
    }

    #[test]
    fn configure_writes_mask_type_and_mode() {
        let bus = ScriptedBus::default();
        let writes = Arc::clone(&bus.writes);
        let _chip = new_chip(bus, TcType::K);
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0], vec![REG_MASK | WRITE_FLAG, 0xFF]);
        assert_eq!(writes[1], vec![REG_CR1 | WRITE_FLAG, 0x03]);
        assert_eq!(writes[2], vec![REG_CR0 | WRITE_FLAG, CR0_AUTOCONVERT | CR0_OCFAULT1]);
    }

    #[test]
    fn type_nibble_follows_datasheet_order() {
        assert_eq!(TcType::B.cr1_nibble(), 0x0);
        assert_eq!(TcType::K.cr1_nibble(), 0x3);
        assert_eq!(TcType::T.cr1_nibble(), 0x7);
    }

    #[test]
    fn decodes_positive_temperature() {
        // 0x019000 >> 5 = 3200 counts, 3200 * 0.0078125 = 25.0 C
        assert_eq!(Max31856::decode_temperature([0x01, 0x90, 0x00]), 25.0);
    }

    #[test]
    fn decodes_negative_temperature() {
        // Two's complement of -1024 in 24 bits, -32 counts = -0.25 C
        assert_eq!(Max31856::decode_temperature([0xFF, 0xFC, 0x00]), -0.25);
    }

    #[test]
    fn read_temperature_goes_through_the_bus() {
        let bus = ScriptedBus::default();
        bus.reads.lock().unwrap().push(vec![0x01, 0x90, 0x00]);
        let mut chip = new_chip(bus, TcType::K);
        assert_eq!(chip.read_temperature().unwrap(), 25.0);
    }

    #[test]
    fn drdy_is_active_low() {
        let bus = ScriptedBus::default();
        let mut chip = Max31856::new(Box::new(bus), Box::new(FixedLine(false)), TcType::K).unwrap();
        assert!(chip.is_data_ready().unwrap());
        let bus = ScriptedBus::default();
        let mut chip = Max31856::new(Box::new(bus), Box::new(FixedLine(true)), TcType::K).unwrap();
        assert!(!chip.is_data_ready().unwrap());
    }

    #[test]
    fn reconfigure_clears_latched_faults() {
        let bus = ScriptedBus::default();
        let writes = Arc::clone(&bus.writes);
        let mut chip = new_chip(bus, TcType::J);
        chip.reconfigure().unwrap();
        let writes = writes.lock().unwrap();
        let last = writes.last().unwrap();
        assert_eq!(last[0], REG_CR0 | WRITE_FLAG);
        assert_ne!(last[1] & CR0_FAULTCLR, 0);
    }

    #[test]
    fn tc_type_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&TcType::K).unwrap(), "\"k\"");
        assert_eq!(serde_json::from_str::<TcType>("\"t\"").unwrap(), TcType::T);
        assert!(serde_json::from_str::<TcType>("\"x\"").is_err());
    }

    #[test]
    fn parses_cli_type_letters() {
        assert_eq!(TcType::parse("k"), Some(TcType::K));
        assert_eq!(TcType::parse("S"), Some(TcType::S));
        assert_eq!(TcType::parse("q"), None);
    }
}
