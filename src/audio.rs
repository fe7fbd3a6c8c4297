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

//! Ignition alert playback.
//!
//! A directory of sound files is scanned once at startup; each alert
//! plays one of them through `aplay`, gated by a physical enable
//! input so the monitor can be silenced at the box without touching
//! configuration. Playback problems are logged and swallowed - audio
//! must never take down the sampling loop.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::hw::{AlertSink, InputLine};
use crate::logger::{self, Level};

pub struct SoundBank {
    files: Vec<PathBuf>,
    gate: Option<Box<dyn InputLine>>,
}

impl SoundBank {
    /// Scan `dir` for regular files. An empty bank is allowed (alerts
    /// become silent) but is logged at startup since it usually means
    /// a packaging mistake.
    pub fn new(dir: &Path, gate: Option<Box<dyn InputLine>>) -> io::Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        if files.is_empty() {
            logger::log_event(
                Level::Warning,
                "sound_bank_empty",
                json!({ "dir": dir.display().to_string() }),
            );
        }
        Ok(Self { files, gate })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Pick a file pseudo-randomly. Seeded from the clock; alert
    /// variety does not justify a dedicated RNG dependency.
    fn pick(&self) -> Option<&PathBuf> {
        if self.files.is_empty() {
            return None;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or(0);
        self.files.get(nanos % self.files.len())
    }
}

impl AlertSink for SoundBank {
    fn alert(&mut self) -> io::Result<()> {
        if let Some(gate) = &self.gate {
            if !gate.is_high()? {
                logger::log_event(Level::Debug, "alert_muted", json!({}));
                return Ok(());
            }
        }
        let Some(file) = self.pick() else {
            return Ok(());
        };
        match Command::new("aplay").arg("-q").arg(file).status() {
            Ok(status) if !status.success() => {
                logger::log_event(
                    Level::Warning,
                    "alert_playback_failed",
                    json!({ "file": file.display().to_string(), "status": status.code() }),
                );
            }
            Err(e) => {
                logger::log_event(
                    Level::Warning,
                    "alert_playback_failed",
                    json!({ "file": file.display().to_string(), "error": e.to_string() }),
                );
            }
            Ok(_) => {}
        }
        Ok(())
    }
}
