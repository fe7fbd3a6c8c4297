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

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::json;

use kilnwatch::audio::SoundBank;
use kilnwatch::config::{self, MonitorConfig};
use kilnwatch::control::ControlChannel;
use kilnwatch::gpio::{InputPin, OutputPin};
use kilnwatch::hw::TemperatureSensor;
use kilnwatch::logger::{self, Level};
use kilnwatch::max31856::{Max31856, SpidevBus, TcType};
use kilnwatch::supervisor::{Drivers, MonitorParams, Supervisor};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Background,
    Stop,
    Oneshot,
}

fn print_usage() {
    eprintln!("kilnwatch {} - thermocouple fire monitor", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    kilnwatch MODE [OPTIONS]");
    eprintln!();
    eprintln!("MODES:");
    eprintln!("    --run               Start the monitor in the foreground");
    eprintln!("    --bg                Start the monitor as a background daemon");
    eprintln!("    --stop              Ask a running monitor to shut down");
    eprintln!("    --oneshot           Read and print one temperature, then exit");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    --config PATH       Use PATH instead of the default config file");
    eprintln!("    --type X            Thermocouple type override (b e j k n r s t)");
    eprintln!("    --loglevel L        Log level (debug, info, warning, critical)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut mode: Option<Mode> = None;
    let mut config_override: Option<PathBuf> = None;
    let mut type_override: Option<TcType> = None;
    let mut level_override: Option<Level> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("kilnwatch {}", VERSION);
                return Ok(());
            }
            "--run" => mode = Some(Mode::Run),
            "--bg" => mode = Some(Mode::Background),
            "--stop" => mode = Some(Mode::Stop),
            "--oneshot" => mode = Some(Mode::Oneshot),
            "--config" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--config requires a path argument");
                };
                config_override = Some(PathBuf::from(path));
            }
            "--type" => {
                i += 1;
                let Some(raw) = args.get(i) else {
                    bail!("--type requires a thermocouple type argument");
                };
                let Some(tc) = TcType::parse(raw) else {
                    bail!("unknown thermocouple type: {}", raw);
                };
                type_override = Some(tc);
            }
            "--loglevel" => {
                i += 1;
                let Some(raw) = args.get(i) else {
                    bail!("--loglevel requires a level argument");
                };
                let Some(level) = logger::parse_level(raw) else {
                    bail!("unknown log level: {}", raw);
                };
                level_override = Some(level);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_usage();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let Some(mode) = mode else {
        print_usage();
        std::process::exit(2);
    };

    let mut cfg = config::load_config(config_override.as_deref())?;
    if let Some(tc) = type_override {
        cfg.tc_type = tc;
    }

    // --stop talks to the socket only; it needs no privileges and no
    // hardware.
    if mode == Mode::Stop {
        ControlChannel::send_shutdown(&cfg.control_host, cfg.control_port)
            .with_context(|| format!("no monitor reachable at {}:{}", cfg.control_host, cfg.control_port))?;
        println!("shutdown sent to {}:{}", cfg.control_host, cfg.control_port);
        return Ok(());
    }

    // Everything else touches SPI and GPIO.
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Error: kilnwatch requires root privileges for SPI and GPIO access.");
        eprintln!(
            "Please run with: sudo {}",
            std::env::args().next().unwrap_or_else(|| "kilnwatch".to_string())
        );
        std::process::exit(1);
    }

    match mode {
        Mode::Oneshot => run_oneshot(&cfg),
        Mode::Run => {
            init_logging(level_override);
            run_monitor(cfg)
        }
        Mode::Background => {
            daemonize()?;
            // Logging starts in the child so the file descriptor
            // survives the fork/setsid dance.
            init_logging(level_override);
            run_monitor(cfg)
        }
        Mode::Stop => unreachable!(),
    }
}

fn init_logging(level_override: Option<Level>) {
    logger::init_logging();
    if let Some(level) = level_override {
        logger::set_level(level);
    }
}

fn build_sensor(cfg: &MonitorConfig) -> Result<Max31856> {
    let bus = SpidevBus::open(&cfg.spidev)
        .with_context(|| format!("open SPI device {}", cfg.spidev.display()))?;
    let drdy = InputPin::open(cfg.drdy_pin)
        .with_context(|| format!("open DRDY line {}", cfg.drdy_pin))?;
    Max31856::new(Box::new(bus), Box::new(drdy), cfg.tc_type).context("configure MAX31856")
}

fn build_drivers(cfg: &MonitorConfig) -> Result<Drivers> {
    let sensor = build_sensor(cfg)?;
    let reset = OutputPin::open(cfg.reset_pin)
        .with_context(|| format!("open reset line {}", cfg.reset_pin))?;
    let heartbeat = OutputPin::open(cfg.heartbeat_pin)
        .with_context(|| format!("open heartbeat line {}", cfg.heartbeat_pin))?;
    let fault = OutputPin::open(cfg.fault_pin)
        .with_context(|| format!("open fault line {}", cfg.fault_pin))?;
    let gate = InputPin::open(cfg.sound_enable_pin)
        .with_context(|| format!("open sound-enable line {}", cfg.sound_enable_pin))?;
    let alert = SoundBank::new(&cfg.sound_dir, Some(Box::new(gate)))
        .with_context(|| format!("scan sound directory {}", cfg.sound_dir.display()))?;
    Ok(Drivers {
        sensor: Box::new(sensor),
        reset: Box::new(reset),
        heartbeat: Box::new(heartbeat),
        fault: Arc::new(fault),
        alert: Box::new(alert),
    })
}

/// Single conversion for field checks: wait for the first automatic
/// conversion to land, then print it.
fn run_oneshot(cfg: &MonitorConfig) -> Result<()> {
    let mut sensor = build_sensor(cfg)?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while !sensor.is_data_ready().context("data-ready poll")? {
        if Instant::now() >= deadline {
            bail!("sensor produced no conversion within 2s (thermocouple connected?)");
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let temp = sensor.read_temperature().context("temperature read")?;
    println!("{:.2}", temp);
    Ok(())
}

fn run_monitor(cfg: MonitorConfig) -> Result<()> {
    let params = MonitorParams::from_config(&cfg);
    let drivers = build_drivers(&cfg)?;
    let mut sup = Supervisor::new(params, drivers);

    // Ctrl-C takes the same path as an external --stop: deliver the
    // shutdown token to our own socket and let join() unwind the
    // threads quietly. Installed before start() so an interrupt during
    // startup is covered too; sending to the not-yet-bound port is a
    // harmless no-op then.
    let host = cfg.control_host.clone();
    let port = cfg.control_port;
    ctrlc::set_handler(move || {
        let _ = ControlChannel::send_shutdown(&host, port);
    })
    .context("install Ctrl-C handler")?;

    sup.start()?;

    let res = sup.join();
    if let Err(e) = &res {
        logger::log_event(
            Level::Critical,
            "monitor_exit_error",
            json!({ "error": format!("{:#}", e) }),
        );
    }
    res
}

/// Classic double-fork daemonization with stdio routed to /dev/null.
fn daemonize() -> Result<()> {
    // SAFETY: fork/setsid have no preconditions; the parent branches
    // only call process::exit.
    unsafe {
        match libc::fork() {
            -1 => bail!("fork failed: {}", io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            bail!("setsid failed: {}", io::Error::last_os_error());
        }
        match libc::fork() {
            -1 => bail!("second fork failed: {}", io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        libc::umask(0o022);
    }
    std::env::set_current_dir("/").context("chdir to /")?;

    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("open /dev/null")?;
    let fd = devnull.as_raw_fd();
    // SAFETY: fd is a valid open descriptor; dup2 onto the standard
    // streams cannot invalidate it.
    unsafe {
        if libc::dup2(fd, 0) == -1 || libc::dup2(fd, 1) == -1 || libc::dup2(fd, 2) == -1 {
            bail!("stdio redirect failed: {}", io::Error::last_os_error());
        }
    }
    Ok(())
}
