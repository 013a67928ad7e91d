// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! One-shot TCP bulk transfer.
//!
//! Large payloads (canvas snapshots, image bytes) never ride in datagrams.
//! The receiver opens a listener on its transfer port and waits bounded
//! time for exactly one inbound connection; the sender connects and streams
//! the whole payload, end-of-stream delimited. A transfer that never
//! arrives is an expected outcome, reported as `Ok(None)` rather than an
//! error, so callers can continue with an empty canvas.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{SOCKET_READ_TIMEOUT, TRANSFER_CONNECT_DELAY};
use crate::error::{Error, Result};

/// Stream `data` to a peer's transfer port.
///
/// Sleeps briefly before connecting so a receiver that was told to expect
/// the transfer in the same exchange has time to open its listener.
pub fn send_stream(addr: SocketAddr, data: &[u8], timeout: Duration) -> Result<()> {
    thread::sleep(TRANSFER_CONNECT_DELAY);
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| Error::Send(format!("connect {}: {}", addr, e)))?;
    stream.set_write_timeout(Some(timeout))?;
    let mut stream = stream;
    stream
        .write_all(data)
        .map_err(|e| Error::Send(format!("stream to {}: {}", addr, e)))?;
    stream.shutdown(Shutdown::Write)?;
    log::info!("[XFER] sent {} bytes to {}", data.len(), addr);
    Ok(())
}

/// Wait up to `timeout` for one inbound transfer on `port`.
///
/// Returns `Ok(None)` when no sender connects in time. Accepts exactly one
/// connection and reads it to end-of-stream.
pub fn receive_stream(port: u16, timeout: Duration) -> Result<Option<Vec<u8>>> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .map_err(|e| Error::Bind(format!("transfer port {}: {}", port, e)))?;
    listener.set_nonblocking(true)?;

    let deadline = Instant::now() + timeout;
    let stream = loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("[XFER] transfer connection from {}", peer);
                break stream;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    log::info!("[XFER] no transfer within {:?} on port {}", timeout, port);
                    return Ok(None);
                }
                thread::sleep(SOCKET_READ_TIMEOUT.min(Duration::from_millis(25)));
            }
            Err(e) => return Err(Error::Io(e)),
        }
    };

    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    let mut stream = stream;
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(|e| Error::Send(format!("transfer read: {}", e)))?;
    log::info!("[XFER] received {} bytes on port {}", data.len(), port);
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_loopback_transfer() {
        let port = 46231;
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let receiver = thread::spawn(move || receive_stream(port, Duration::from_secs(5)));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        send_stream(addr, &payload, Duration::from_secs(5)).expect("send");

        let got = receiver.join().expect("join").expect("receive");
        assert_eq!(got, Some(expected));
    }

    #[test]
    fn test_receive_times_out_cleanly() {
        let got = receive_stream(46232, Duration::from_millis(200)).expect("receive");
        assert_eq!(got, None);
    }

    #[test]
    fn test_send_to_closed_port_is_an_error() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 46233);
        let err = send_stream(addr, b"xyz", Duration::from_millis(500));
        assert!(matches!(err, Err(Error::Send(_))));
    }
}
