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

use std::thread;
use std::time::Duration;

use crate::hw::IndicatorLine;

/// Poll cadence for the run flag when the blink itself is disabled.
const DISABLED_POLL: Duration = Duration::from_millis(100);

/// Toggle `line` once every `half_period` for as long as
/// `should_continue` holds, then force it off.
///
/// `half_period` is half the full on/off cycle; the caller divides the
/// configured cycle duration by two before calling. A zero
/// `half_period` holds the line off but keeps polling the run flag so
/// shutdown still works with the blink disabled.
///
/// Shutdown latency is at most one `half_period` (or one
/// `DISABLED_POLL`), since the flag is checked once per iteration.
pub fn run<F>(line: &dyn IndicatorLine, half_period: Duration, mut should_continue: F) -> std::io::Result<()>
where
    F: FnMut() -> bool,
{
    if half_period.is_zero() {
        line.set(false)?;
        while should_continue() {
            thread::sleep(DISABLED_POLL);
        }
    } else {
        let mut on = false;
        while should_continue() {
            on = !on;
            line.set(on)?;
            thread::sleep(half_period);
        }
    }
    line.set(false)
}
