// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Multicast peer discovery.
//!
//! Peers find each other without any coordinator: a joining peer multicasts
//! a discovery announcement to the group, and every listener that did not
//! already know the sender adds it to its peer directory and answers with a
//! unicast reply naming itself. The multicast socket is also the broadcast
//! path for drawing messages and recovery requests; anything that is not a
//! discovery announcement is forwarded to the node's main loop over a
//! channel rather than handled on the listener thread.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{self, SOCKET_READ_TIMEOUT};
use crate::directory::PeerDirectory;
use crate::error::{Error, Result};
use crate::protocol::codec;
use crate::protocol::{Body, Host, Message};

/// Lifecycle of a node's session membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Announcement sent, waiting for replies and the initial snapshot.
    Discovering,
    Connected,
    /// Leave notices being sent, sockets shutting down.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Pick the interfaces to join the group on. An explicit override via the
/// environment wins; otherwise every non-loopback IPv4 interface, falling
/// back to the unspecified interface when enumeration fails.
fn join_interfaces() -> Vec<Ipv4Addr> {
    if let Some(ip) = config::multicast_interface_override() {
        return vec![ip];
    }
    let mut out = Vec::new();
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => {
            for (name, addr) in ifas {
                if let std::net::IpAddr::V4(v4) = addr {
                    if !v4.is_loopback() {
                        log::debug!("[DISC] joining group on {} ({})", v4, name);
                        out.push(v4);
                    }
                }
            }
        }
        Err(e) => log::warn!("[DISC] interface enumeration failed: {}", e),
    }
    if out.is_empty() {
        out.push(Ipv4Addr::UNSPECIFIED);
    }
    out
}

/// Multicast group membership plus the listener thread that serves it.
pub struct DiscoveryService {
    local: Host,
    group: Ipv4Addr,
    group_port: u16,
    socket: UdpSocket,
    joined: Vec<Ipv4Addr>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Join the group and start the listener.
    ///
    /// Discovery announcements are handled on the listener thread (insert
    /// into `directory`, unicast a reply when the sender was new); every
    /// other multicast message is pushed to `forward` with its source
    /// address.
    pub fn start(
        local: Host,
        group: Ipv4Addr,
        group_port: u16,
        directory: Arc<PeerDirectory>,
        forward: Sender<(Message, SocketAddr)>,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::Bind(format!("multicast socket: {}", e)))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group_port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| Error::Bind(format!("{}: {}", bind_addr, e)))?;

        let joined = join_interfaces();
        let mut joined_ok = Vec::new();
        for ifa in &joined {
            match socket.join_multicast_v4(&group, ifa) {
                Ok(()) => joined_ok.push(*ifa),
                Err(e) => log::debug!("[DISC] join {} on {} failed: {}", group, ifa, e),
            }
        }
        if joined_ok.is_empty() {
            return Err(Error::MulticastJoin(format!(
                "no interface could join {}",
                group
            )));
        }
        // Same-host peers share the group; loopback delivery is required.
        socket.set_multicast_loop_v4(true)?;
        if let Some(ifa) = config::multicast_interface_override() {
            // Outgoing datagrams must use the overridden interface too.
            socket.set_multicast_if_v4(&ifa)?;
        }

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(SOCKET_READ_TIMEOUT))?;

        let running = Arc::new(AtomicBool::new(true));
        let listener = socket.try_clone()?;
        let flag = Arc::clone(&running);
        let me = local.clone();
        let handle = thread::Builder::new()
            .name("sw-discovery".into())
            .spawn(move || listen(listener, me, directory, forward, flag))
            .map_err(|e| Error::InvalidState(format!("discovery thread: {}", e)))?;

        log::info!(
            "[DISC] joined {}:{} on {} interface(s)",
            group,
            group_port,
            joined_ok.len()
        );
        Ok(Self {
            local,
            group,
            group_port,
            socket,
            joined: joined_ok,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Multicast a discovery announcement for the local host.
    pub fn announce(&self) -> Result<()> {
        log::info!("[DISC] announcing {}", self.local);
        self.multicast(&Message::unstamped(Body::Discovery(self.local.clone())))
    }

    /// Multicast any message to the group.
    pub fn multicast(&self, msg: &Message) -> Result<()> {
        let bytes = codec::encode(msg);
        let dst = SocketAddrV4::new(self.group, self.group_port);
        self.socket
            .send_to(&bytes, dst)
            .map_err(|e| Error::Send(format!("multicast to {}: {}", dst, e)))?;
        Ok(())
    }

    /// Stop the listener and leave the group. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        let _ = handle.join();
        for ifa in &self.joined {
            if let Err(e) = self.socket.leave_multicast_v4(&self.group, ifa) {
                log::debug!("[DISC] leave {} on {} failed: {}", self.group, ifa, e);
            }
        }
        log::info!("[DISC] left {}", self.group);
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen(
    socket: UdpSocket,
    local: Host,
    directory: Arc<PeerDirectory>,
    forward: Sender<(Message, SocketAddr)>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; codec::max_encoded_len()];
    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(ok) => ok,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    log::warn!("[DISC] recv failed: {}", e);
                }
                continue;
            }
        };
        let msg = match codec::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[DISC] undecodable datagram from {}: {}", src, e);
                continue;
            }
        };
        match msg.body {
            Body::Discovery(ref host) => {
                if *host == local {
                    // Our own announcement looped back.
                    continue;
                }
                if directory.insert(host.clone()) {
                    let reply = Message::unstamped(Body::DiscoveryReply(local.clone()));
                    if let Err(e) = socket.send_to(&codec::encode(&reply), host.addr()) {
                        log::warn!("[DISC] reply to {} failed: {}", host, e);
                    }
                }
            }
            _ => {
                if forward.send((msg, src)).is_err() {
                    // Main loop gone; shut the listener down.
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Discovering.to_string(), "discovering");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
    }

    #[test]
    fn test_join_interfaces_never_empty() {
        assert!(!join_interfaces().is_empty());
    }
}
