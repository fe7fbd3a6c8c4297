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

//! Configuration loading and validation.
//!
//! All values are validated here, before any GPIO or SPI resource is
//! claimed, so a bad config can never leave pins half-configured.

use std::env;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpio::MAX_BCM_PIN;
use crate::max31856::TcType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Rising threshold: a sample above this ignites (degrees C).
    pub thresh: f64,
    /// Falling threshold: an active fire is considered out below this.
    /// Must be strictly less than `thresh`.
    pub off_thresh: f64,

    /// Poll period while Idle, watching for ignition (seconds).
    #[serde(default = "default_t_read")]
    pub t_read: f64,
    /// Poll period while the fire is Active (seconds).
    #[serde(default = "default_t_going")]
    pub t_going: f64,

    /// Consecutive not-ready polls before a power-cycle recovery.
    #[serde(default = "default_drdy_timeout_polls")]
    pub drdy_timeout_polls: u32,
    /// Settle time either side of the reset pulse (seconds).
    #[serde(default = "default_settle_delay")]
    pub settle_delay: f64,

    #[serde(default)]
    pub tc_type: TcType,
    #[serde(default = "default_spidev")]
    pub spidev: PathBuf,

    // BCM line numbers.
    #[serde(default = "default_drdy_pin")]
    pub drdy_pin: u8,
    #[serde(default = "default_reset_pin")]
    pub reset_pin: u8,
    #[serde(default = "default_heartbeat_pin")]
    pub heartbeat_pin: u8,
    #[serde(default = "default_fault_pin")]
    pub fault_pin: u8,
    #[serde(default = "default_sound_enable_pin")]
    pub sound_enable_pin: u8,

    /// Full heartbeat on/off cycle (seconds). 0 disables the blink.
    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period: f64,

    #[serde(default = "default_control_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    #[serde(default = "default_sound_dir")]
    pub sound_dir: PathBuf,
}

fn default_t_read() -> f64 {
    1.0
}

fn default_t_going() -> f64 {
    5.0
}

fn default_drdy_timeout_polls() -> u32 {
    10
}

fn default_settle_delay() -> f64 {
    0.5
}

fn default_spidev() -> PathBuf {
    PathBuf::from("/dev/spidev0.0")
}

fn default_drdy_pin() -> u8 {
    27
}

fn default_reset_pin() -> u8 {
    17
}

fn default_heartbeat_pin() -> u8 {
    23
}

fn default_fault_pin() -> u8 {
    24
}

fn default_sound_enable_pin() -> u8 {
    25
}

fn default_heartbeat_period() -> f64 {
    1.0
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    3856
}

fn default_sound_dir() -> PathBuf {
    PathBuf::from("/usr/share/kilnwatch/sounds")
}

/// Per-user config path, honoring `XDG_CONFIG_HOME`.
pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("kilnwatch").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("kilnwatch")
            .join("config.json");
    }
    system_config_path()
}

pub fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/kilnwatch/config.json")
}

/// Load and validate a config. `explicit` (from `--config`) wins over
/// the per-user path, which wins over the system path.
pub fn load_config(explicit: Option<&Path>) -> Result<MonitorConfig, ConfigError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let user = config_path();
            if user.exists() {
                user
            } else {
                system_config_path()
            }
        }
    };
    let data = fs::read_to_string(&path).map_err(|e| ConfigError::Read { path: path.clone(), source: e })?;
    let cfg: MonitorConfig =
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse { path: path.clone(), source: e })?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &MonitorConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if !cfg.thresh.is_finite() || !cfg.off_thresh.is_finite() {
        return invalid("thresh and off_thresh must be finite".into());
    }
    if cfg.off_thresh >= cfg.thresh {
        return invalid(format!(
            "off_thresh ({}) must be strictly less than thresh ({}); equal or inverted thresholds oscillate",
            cfg.off_thresh, cfg.thresh
        ));
    }
    if !(cfg.t_read > 0.0) || !cfg.t_read.is_finite() {
        return invalid(format!("t_read must be positive, got {}", cfg.t_read));
    }
    if !(cfg.t_going > 0.0) || !cfg.t_going.is_finite() {
        return invalid(format!("t_going must be positive, got {}", cfg.t_going));
    }
    if cfg.drdy_timeout_polls == 0 {
        return invalid("drdy_timeout_polls must be at least 1".into());
    }
    if !(cfg.settle_delay >= 0.0) || !cfg.settle_delay.is_finite() {
        return invalid(format!("settle_delay must be non-negative, got {}", cfg.settle_delay));
    }
    if !(cfg.heartbeat_period >= 0.0) || !cfg.heartbeat_period.is_finite() {
        return invalid(format!("heartbeat_period must be non-negative, got {}", cfg.heartbeat_period));
    }

    let pins = [
        ("drdy_pin", cfg.drdy_pin),
        ("reset_pin", cfg.reset_pin),
        ("heartbeat_pin", cfg.heartbeat_pin),
        ("fault_pin", cfg.fault_pin),
        ("sound_enable_pin", cfg.sound_enable_pin),
    ];
    for (name, pin) in pins {
        if pin > MAX_BCM_PIN {
            return invalid(format!("{} ({}) exceeds BCM line {}", name, pin, MAX_BCM_PIN));
        }
    }
    for i in 0..pins.len() {
        for j in (i + 1)..pins.len() {
            if pins[i].1 == pins[j].1 {
                return invalid(format!(
                    "{} and {} are both assigned BCM line {}",
                    pins[i].0, pins[j].0, pins[i].1
                ));
            }
        }
    }

    match cfg.control_host.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => {}
        Ok(ip) => {
            return invalid(format!(
                "control_host must be a loopback address, got {}; the control plane is local-only",
                ip
            ));
        }
        Err(_) => return invalid(format!("control_host '{}' is not an IP address", cfg.control_host)),
    }
    if cfg.control_port == 0 {
        return invalid("control_port must be non-zero".into());
    }
    Ok(())
}
