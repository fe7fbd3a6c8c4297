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

//! Monitor lifecycle: one shared run flag, three threads.
//!
//! The run flag is the only cross-thread coordination primitive. It is
//! written true once at start and false once at shutdown; every loop
//! reads it once per iteration, so shutdown latency is bounded by one
//! sleep period per loop (the listener instead wakes on the shutdown
//! connection itself). The sample buffer and fault counter live
//! entirely inside the sampling thread - single writer, no locks.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use thiserror::Error;

use crate::buffer::SampleBuffer;
use crate::config::MonitorConfig;
use crate::control::{ControlChannel, ControlError, ControlMessage};
use crate::detector::{FireEdge, FireState, HysteresisDetector};
use crate::fault::{FaultMonitor, PollOutcome};
use crate::heartbeat;
use crate::hw::{AlertSink, IndicatorLine, ResetLine, TemperatureSensor};
use crate::logger::{self, Level};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("this supervisor already completed a run; construct a new one")]
    Spent,

    #[error(transparent)]
    Bind(#[from] ControlError),
}

/// Lifecycle states. `Stopping` covers the window between a shutdown
/// request and `join()` observing all three loops gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

/// Everything the monitor needs from the outside world.
pub struct Drivers {
    pub sensor: Box<dyn TemperatureSensor>,
    pub reset: Box<dyn ResetLine>,
    pub heartbeat: Box<dyn IndicatorLine>,
    /// Shared between the sampling loop and the control listener.
    pub fault: Arc<dyn IndicatorLine>,
    pub alert: Box<dyn AlertSink>,
}

/// Validated operating parameters, with durations already converted.
#[derive(Debug, Clone)]
pub struct MonitorParams {
    pub thresh: f64,
    pub off_thresh: f64,
    /// Poll period while Idle (watching for ignition).
    pub t_read: Duration,
    /// Poll period while the fire is Active.
    pub t_going: Duration,
    pub drdy_timeout_polls: u32,
    pub settle_delay: Duration,
    /// Full heartbeat cycle; halved before it reaches the blink loop.
    pub heartbeat_period: Duration,
    pub control_host: String,
    pub control_port: u16,
}

impl MonitorParams {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            thresh: cfg.thresh,
            off_thresh: cfg.off_thresh,
            t_read: Duration::from_secs_f64(cfg.t_read),
            t_going: Duration::from_secs_f64(cfg.t_going),
            drdy_timeout_polls: cfg.drdy_timeout_polls,
            settle_delay: Duration::from_secs_f64(cfg.settle_delay),
            heartbeat_period: Duration::from_secs_f64(cfg.heartbeat_period),
            control_host: cfg.control_host.clone(),
            control_port: cfg.control_port,
        }
    }
}

pub struct Supervisor {
    params: MonitorParams,
    drivers: Option<Drivers>,
    fault_line: Option<Arc<dyn IndicatorLine>>,
    run: Arc<AtomicBool>,
    handles: Vec<(&'static str, JoinHandle<Result<()>>)>,
    state: RunState,
    bound_port: Option<u16>,
}

impl Supervisor {
    pub fn new(params: MonitorParams, drivers: Drivers) -> Self {
        Self {
            params,
            drivers: Some(drivers),
            fault_line: None,
            run: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            state: RunState::Stopped,
            bound_port: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The actually bound control port (useful when configured as 0).
    pub fn control_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Bind the control channel and launch the sampling, listener, and
    /// heartbeat threads. Binding happens before the run flag flips so
    /// a port collision leaves the supervisor fully Stopped.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.state != RunState::Stopped {
            return Err(SupervisorError::AlreadyRunning);
        }
        let drivers = self.drivers.take().ok_or(SupervisorError::Spent)?;
        let channel = ControlChannel::bind(&self.params.control_host, self.params.control_port)?;
        let port = channel
            .local_addr()
            .map_err(|e| SupervisorError::Bind(ControlError::Io(e)))?
            .port();
        self.bound_port = Some(port);

        let Drivers { sensor, reset, heartbeat: heartbeat_line, fault, alert } = drivers;
        self.fault_line = Some(Arc::clone(&fault));
        self.run.store(true, Ordering::SeqCst);
        logger::log_event(
            Level::Info,
            "monitor_started",
            json!({
                "thresh": self.params.thresh,
                "off_thresh": self.params.off_thresh,
                "control_port": port,
            }),
        );

        let host = self.params.control_host.clone();

        // Sampling / detection loop.
        {
            let run = Arc::clone(&self.run);
            let fault = Arc::clone(&fault);
            let params = self.params.clone();
            let host = host.clone();
            let handle = thread::spawn(move || {
                let res = sampling_loop(sensor, reset, alert, &fault, &params, &run);
                if let Err(e) = &res {
                    run.store(false, Ordering::SeqCst);
                    let _ = fault.set(true);
                    logger::log_event(
                        Level::Critical,
                        "sampling_loop_fatal",
                        json!({ "error": format!("{:#}", e) }),
                    );
                    nudge_listener(&host, port);
                }
                res
            });
            self.handles.push(("sampling", handle));
        }

        // Control listener loop.
        {
            let run = Arc::clone(&self.run);
            let fault = Arc::clone(&fault);
            let handle = thread::spawn(move || {
                let flag = Arc::clone(&run);
                let res = channel
                    .accept_loop(
                        || flag.load(Ordering::SeqCst),
                        |msg| match msg {
                            ControlMessage::Shutdown => {
                                logger::log_event(Level::Info, "shutdown_received", json!({}));
                                run.store(false, Ordering::SeqCst);
                            }
                            ControlMessage::Unrecognized(payload) => {
                                // The fatal-path nudge connect arrives
                                // with an empty payload after the flag
                                // clears; that is not a violation.
                                if !run.load(Ordering::SeqCst) {
                                    return;
                                }
                                let _ = fault.set(true);
                                logger::log_event(
                                    Level::Warning,
                                    "control_protocol_violation",
                                    json!({ "payload": String::from_utf8_lossy(&payload) }),
                                );
                            }
                        },
                    )
                    .context("control listener");
                res
            });
            self.handles.push(("listener", handle));
        }

        // Heartbeat loop.
        {
            let run = Arc::clone(&self.run);
            let half_period = self.params.heartbeat_period / 2;
            let handle = thread::spawn(move || {
                let res = heartbeat::run(heartbeat_line.as_ref(), half_period, || run.load(Ordering::SeqCst))
                    .context("heartbeat loop");
                if res.is_err() {
                    run.store(false, Ordering::SeqCst);
                    nudge_listener(&host, port);
                }
                res
            });
            self.handles.push(("heartbeat", handle));
        }

        self.state = RunState::Running;
        Ok(())
    }

    /// Block until all three loops have exited, then release
    /// resources. The first loop failure is propagated; on a clean
    /// shutdown the fault indicator is forced off, while after a
    /// failure it is left asserted as the visible evidence.
    pub fn join(&mut self) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for (name, handle) in self.handles.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e.context(format!("{} loop failed", name)));
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(anyhow!("{} loop panicked", name));
                    }
                }
            }
        }
        self.run.store(false, Ordering::SeqCst);
        self.state = RunState::Stopped;
        match first_err {
            None => {
                if let Some(fault) = &self.fault_line {
                    let _ = fault.set(false);
                }
                logger::log_event(Level::Info, "monitor_stopped", json!({}));
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Deliver the shutdown token to our own control channel. This is
    /// the same path an external `--stop` takes.
    pub fn stop(&mut self, wait_for_join: bool) -> Result<()> {
        if self.state != RunState::Running {
            return Ok(());
        }
        self.state = RunState::Stopping;
        let port = self.bound_port.unwrap_or(self.params.control_port);
        ControlChannel::send_shutdown(&self.params.control_host, port)?;
        if wait_for_join {
            self.join()?;
        }
        Ok(())
    }
}

/// One sampling iteration: poll data-ready, feed the buffer on fresh
/// data, power-cycle on timeout, evaluate the detector, sleep for the
/// state-dependent period. Any error escaping here is fatal to the
/// whole monitor.
fn sampling_loop(
    mut sensor: Box<dyn TemperatureSensor>,
    mut reset: Box<dyn ResetLine>,
    mut alert: Box<dyn AlertSink>,
    fault: &Arc<dyn IndicatorLine>,
    params: &MonitorParams,
    run: &AtomicBool,
) -> Result<()> {
    let mut buffer = SampleBuffer::new();
    let mut monitor = FaultMonitor::new(params.drdy_timeout_polls);
    let mut detector = HysteresisDetector::new(params.thresh, params.off_thresh);

    while run.load(Ordering::SeqCst) {
        let ready = sensor.is_data_ready().context("data-ready poll")?;
        match monitor.poll(ready) {
            PollOutcome::Fresh => {
                fault.set(false).context("clear fault indicator")?;
                let temp = sensor.read_temperature().context("temperature read")?;
                buffer.push(temp);
                if logger::enabled(Level::Debug) {
                    logger::log_event(
                        Level::Debug,
                        "sample",
                        json!({ "temp_c": temp, "prev_c": buffer.previous() }),
                    );
                }
            }
            PollOutcome::Stale => {
                fault.set(false).context("clear fault indicator")?;
            }
            PollOutcome::TimedOut => {
                fault.set(true).context("assert fault indicator")?;
                logger::log_event(
                    Level::Critical,
                    "sensor_timeout",
                    json!({
                        "misses": monitor.consecutive_misses(),
                        "stale_for_s": monitor.since_last_fresh().as_secs_f64(),
                    }),
                );
                recover(sensor.as_mut(), reset.as_mut(), params.settle_delay)?;
                monitor.reset();
                continue;
            }
        }

        let (state, edge) = detector.evaluate(buffer.current());
        match edge {
            Some(FireEdge::Ignition) => {
                logger::log_event(Level::Info, "fire_detected", json!({ "temp_c": buffer.current() }));
                if let Err(e) = alert.alert() {
                    // Alert hardware trouble is not worth killing the
                    // monitor over.
                    logger::log_event(
                        Level::Warning,
                        "alert_failed",
                        json!({ "error": e.to_string() }),
                    );
                }
            }
            Some(FireEdge::Extinguished) => {
                logger::log_event(Level::Info, "fire_out", json!({ "temp_c": buffer.current() }));
            }
            None => {}
        }

        let pause = if state == FireState::Active { params.t_going } else { params.t_read };
        thread::sleep(pause);
    }
    Ok(())
}

/// Power-cycle the sensor: pulse the reset line with settle time on
/// both sides and rewrite the control registers.
fn recover(sensor: &mut dyn TemperatureSensor, reset: &mut dyn ResetLine, settle: Duration) -> Result<()> {
    reset.assert_reset().context("assert reset line")?;
    thread::sleep(settle);
    reset.release_reset().context("release reset line")?;
    sensor.reconfigure().context("sensor reconfigure")?;
    thread::sleep(settle);
    logger::log_event(Level::Info, "sensor_power_cycled", json!({}));
    Ok(())
}

/// Wake a listener blocked in accept so it can observe the cleared run
/// flag. Best-effort; the empty connection is ignored by the handler.
fn nudge_listener(host: &str, port: u16) {
    if let Ok(mut addrs) = (host, port).to_socket_addrs() {
        if let Some(addr) = addrs.next() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(500));
        }
    }
}
