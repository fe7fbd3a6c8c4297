/*
 * Integration tests for Kilnwatch
 *
 * These tests run a whole supervisor against fake drivers and talk to
 * it over the real loopback control socket, the same way an external
 * --stop invocation would.
 */

use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kilnwatch::control::{ControlChannel, ControlError};
use kilnwatch::hw::{AlertSink, IndicatorLine, ResetLine, TemperatureSensor};
use kilnwatch::supervisor::{Drivers, MonitorParams, RunState, Supervisor, SupervisorError};

struct ReplaySensor {
    readings: Arc<Mutex<VecDeque<f64>>>,
    last: f64,
}

impl ReplaySensor {
    fn new(script: &[f64]) -> Self {
        Self {
            readings: Arc::new(Mutex::new(script.iter().copied().collect())),
            last: 0.0,
        }
    }
}

impl TemperatureSensor for ReplaySensor {
    fn read_temperature(&mut self) -> io::Result<f64> {
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }

    fn is_data_ready(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn reconfigure(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FlagIndicator {
    state: Arc<AtomicBool>,
    history: Arc<Mutex<Vec<bool>>>,
}

impl IndicatorLine for FlagIndicator {
    fn set(&self, on: bool) -> io::Result<()> {
        self.state.store(on, Ordering::SeqCst);
        self.history.lock().unwrap().push(on);
        Ok(())
    }
}

struct NopReset;

impl ResetLine for NopReset {
    fn assert_reset(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn release_reset(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountAlert {
    count: Arc<AtomicUsize>,
}

impl AlertSink for CountAlert {
    fn alert(&mut self) -> io::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn params() -> MonitorParams {
    MonitorParams {
        thresh: 50.0,
        off_thresh: 30.0,
        t_read: Duration::from_millis(5),
        t_going: Duration::from_millis(5),
        drdy_timeout_polls: 5,
        settle_delay: Duration::from_millis(1),
        heartbeat_period: Duration::from_millis(20),
        control_host: "127.0.0.1".to_string(),
        // Ephemeral port; tests read the bound port back.
        control_port: 0,
    }
}

fn supervisor_with(script: &[f64]) -> (Supervisor, FlagIndicator, FlagIndicator, Arc<AtomicUsize>) {
    let heartbeat = FlagIndicator::default();
    let fault = FlagIndicator::default();
    let alert = CountAlert::default();
    let alerts = Arc::clone(&alert.count);
    let drivers = Drivers {
        sensor: Box::new(ReplaySensor::new(script)),
        reset: Box::new(NopReset),
        heartbeat: Box::new(heartbeat.clone()),
        fault: Arc::new(fault.clone()),
        alert: Box::new(alert),
    };
    (Supervisor::new(params(), drivers), heartbeat, fault, alerts)
}

fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn fire_cycle_raises_exactly_one_alert_and_stops_on_token() {
    // Idle at 20, ignite at 60, hold, burn out at 20, then reignite.
    // The second alert can only fire if the detector came back to Idle
    // after the burn-out, so this covers the full cycle, not just the
    // first edge.
    let (mut sup, heartbeat, fault, alerts) =
        supervisor_with(&[20.0, 60.0, 60.0, 40.0, 20.0, 20.0, 60.0]);
    sup.start().unwrap();
    let port = sup.control_port().unwrap();

    assert!(
        wait_until(|| alerts.load(Ordering::SeqCst) == 1, Duration::from_secs(2)),
        "ignition alert never fired"
    );
    assert!(
        wait_until(|| alerts.load(Ordering::SeqCst) == 2, Duration::from_secs(2)),
        "no alert on reignition; the fire state never returned to Idle"
    );
    // The script ends holding above thresh; no further edges may fire.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(alerts.load(Ordering::SeqCst), 2, "alert must fire once per ignition");

    ControlChannel::send_shutdown("127.0.0.1", port).unwrap();
    sup.join().unwrap();
    assert_eq!(sup.state(), RunState::Stopped);
    assert!(!heartbeat.state.load(Ordering::SeqCst));
    assert!(!fault.state.load(Ordering::SeqCst));
}

#[test]
fn second_instance_on_the_same_port_fails_to_start() {
    let occupant = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupant.local_addr().unwrap().port();

    let heartbeat = FlagIndicator::default();
    let fault = FlagIndicator::default();
    let drivers = Drivers {
        sensor: Box::new(ReplaySensor::new(&[20.0])),
        reset: Box::new(NopReset),
        heartbeat: Box::new(heartbeat),
        fault: Arc::new(fault),
        alert: Box::new(CountAlert::default()),
    };
    let mut p = params();
    p.control_port = port;
    let mut sup = Supervisor::new(p, drivers);

    match sup.start() {
        Err(SupervisorError::Bind(ControlError::AddrInUse { .. })) => {}
        other => panic!("expected AddrInUse, got {:?}", other.err()),
    }
    assert_eq!(sup.state(), RunState::Stopped);
}

#[test]
fn garbage_payload_asserts_fault_but_does_not_stop_the_monitor() {
    let (mut sup, _hb, fault, _alerts) = supervisor_with(&[20.0]);
    sup.start().unwrap();
    let port = sup.control_port().unwrap();

    let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
    conn.write_all(b"reboot please").unwrap();
    drop(conn);

    assert!(
        wait_until(|| fault.state.load(Ordering::SeqCst), Duration::from_secs(2)),
        "protocol violation did not assert the fault indicator"
    );
    assert_eq!(sup.state(), RunState::Running);

    sup.stop(true).unwrap();
    assert_eq!(sup.state(), RunState::Stopped);
    // Clean shutdown clears the latched violation indication.
    assert!(!fault.state.load(Ordering::SeqCst));
}

#[test]
fn token_with_trailing_newline_is_a_violation_not_a_shutdown() {
    let (mut sup, _hb, fault, _alerts) = supervisor_with(&[20.0]);
    sup.start().unwrap();
    let port = sup.control_port().unwrap();

    let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
    conn.write_all(b"off\n").unwrap();
    drop(conn);

    assert!(
        wait_until(|| fault.state.load(Ordering::SeqCst), Duration::from_secs(2)),
        "near-miss token was not treated as a violation"
    );
    assert_eq!(sup.state(), RunState::Running);

    // The exact token still works afterwards.
    ControlChannel::send_shutdown("127.0.0.1", port).unwrap();
    sup.join().unwrap();
    assert_eq!(sup.state(), RunState::Stopped);
}

#[test]
fn heartbeat_blinks_while_running() {
    let (mut sup, heartbeat, _fault, _alerts) = supervisor_with(&[20.0]);
    sup.start().unwrap();

    assert!(
        wait_until(
            || {
                let h = heartbeat.history.lock().unwrap();
                h.contains(&true) && h.contains(&false)
            },
            Duration::from_secs(2)
        ),
        "heartbeat never toggled"
    );

    sup.stop(true).unwrap();
    let h = heartbeat.history.lock().unwrap();
    assert_eq!(h.last(), Some(&false), "heartbeat line must end low");
}
