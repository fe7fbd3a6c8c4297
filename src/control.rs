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

//! Loopback control plane.
//!
//! One listener per process instance; binding the port doubles as the
//! single-instance lock. The wire protocol is a single unframed
//! message per connection, and the only valid message is the shutdown
//! token `off`. No replies are ever sent.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::logger::{self, Level};

/// The only recognized command payload.
pub const SHUTDOWN_TOKEN: &[u8] = b"off";

/// Upper bound on bytes read from one connection.
pub const MAX_MESSAGE_LEN: usize = 128;

/// How long a connected client may dribble bytes before we give up on
/// it and classify whatever arrived.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control port {addr} is already bound by another instance")]
    AddrInUse { addr: String },

    #[error("no monitor listening at {addr}")]
    Refused { addr: String },

    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A decoded control-plane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The exact shutdown token was received.
    Shutdown,
    /// Anything else: a protocol violation. Carries the full payload
    /// for diagnostics.
    Unrecognized(Vec<u8>),
}

/// Bound loopback listener for the shutdown command.
pub struct ControlChannel {
    listener: TcpListener,
}

impl ControlChannel {
    /// Bind the control endpoint. Fails with `AddrInUse` when another
    /// instance already owns the port.
    pub fn bind(host: &str, port: u16) -> Result<Self, ControlError> {
        let addr = (host, port);
        let listener = TcpListener::bind(addr).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                ControlError::AddrInUse { addr: format!("{}:{}", host, port) }
            } else {
                ControlError::Io(e)
            }
        })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections one at a time, decoding each into a
    /// [`ControlMessage`] and handing it to `on_message`. The loop
    /// re-checks `should_continue` once per accepted connection, so it
    /// exits on the first connection after the run flag clears -
    /// including the shutdown connection itself.
    pub fn accept_loop<C, M>(&self, mut should_continue: C, mut on_message: M) -> io::Result<()>
    where
        C: FnMut() -> bool,
        M: FnMut(ControlMessage),
    {
        while should_continue() {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    if !should_continue() {
                        break;
                    }
                    logger::log_event(
                        Level::Warning,
                        "control_accept_error",
                        json!({ "error": e.to_string() }),
                    );
                    continue;
                }
            };
            let payload = read_bounded(stream);
            let msg = if payload == SHUTDOWN_TOKEN {
                ControlMessage::Shutdown
            } else {
                logger::log_event(
                    Level::Debug,
                    "control_message",
                    json!({ "peer": peer.to_string(), "len": payload.len() }),
                );
                ControlMessage::Unrecognized(payload)
            };
            on_message(msg);
        }
        Ok(())
    }

    /// Connect to a running instance and deliver the shutdown token.
    /// This is the only way to cleanly stop a running monitor.
    pub fn send_shutdown(host: &str, port: u16) -> Result<(), ControlError> {
        let display = format!("{}:{}", host, port);
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable control address"))?;
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).map_err(|e| {
            if e.kind() == io::ErrorKind::ConnectionRefused {
                ControlError::Refused { addr: display.clone() }
            } else {
                ControlError::Io(e)
            }
        })?;
        stream.write_all(SHUTDOWN_TOKEN)?;
        Ok(())
    }
}

/// Read up to `MAX_MESSAGE_LEN` bytes from one client, stopping at EOF,
/// a full buffer, or the read timeout. Returns whatever arrived.
fn read_bounded(mut stream: TcpStream) -> Vec<u8> {
    let _ = stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT));
    let mut buf = [0u8; MAX_MESSAGE_LEN];
    let mut n = 0;
    loop {
        match stream.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => {
                n += k;
                if n == buf.len() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    buf[..n].to_vec()
}
