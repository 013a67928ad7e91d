// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Protocol constants and node configuration - single source of truth.
//!
//! Every port, group address and timeout used on the wire lives here.
//! Never hardcode these elsewhere.

use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Multicast discovery
// =======================================================================

/// Discovery multicast group all peers join.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 4, 5, 8);

/// Reserved port the multicast group listens on.
pub const MULTICAST_PORT: u16 = 55559;

// =======================================================================
// Unicast messaging
// =======================================================================

/// Default UDP port for direct peer messaging.
pub const DEFAULT_NODE_PORT: u16 = 55551;

/// Ports tried in order when the configured port is already bound.
///
/// Nodes on the same machine each take one of these, so they must never
/// collide with the reserved multicast or transfer ports.
pub const FALLBACK_PORTS: [u16; 5] = [55551, 55552, 55553, 55554, 55555];

// =======================================================================
// Bulk transfer
// =======================================================================

/// Reserved TCP port for snapshot and image transfer (one at a time).
pub const TRANSFER_PORT: u16 = 55558;

/// Deadline for a transfer peer to connect or finish sending.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace delay before a sender connects, letting the receiver finish
/// binding its short-lived listener.
pub const TRANSFER_CONNECT_DELAY: Duration = Duration::from_millis(150);

// =======================================================================
// Listener scheduling
// =======================================================================

/// Read timeout on blocking receives; doubles as the scheduling tick for
/// pending-buffer drains and the cancellation check interval.
pub const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a deferred message waits before its first recovery request.
pub const RECOVERY_DELAY: Duration = Duration::from_millis(500);

/// Minimum spacing between repeated recovery requests for the same id.
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// How long a freshly announced node waits for a discovery reply before
/// concluding it is the first peer in the session.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(1);

/// Env var forcing the multicast interface (parsed as an IPv4 address).
pub const MULTICAST_IF_ENV: &str = "SKETCHWIRE_MULTICAST_IF";

/// Node configuration, built through [`crate::Node::builder`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Display name announced to peers.
    pub name: String,
    /// Preferred UDP port for direct messaging.
    pub port: u16,
    /// Try [`FALLBACK_PORTS`] when the preferred port is taken.
    pub port_fallback: bool,
    /// Multicast group for discovery.
    pub multicast_group: Ipv4Addr,
    /// Multicast port for discovery.
    pub multicast_port: u16,
    /// TCP port for bulk transfer.
    pub transfer_port: u16,
    /// Deadline for bulk-transfer accept/read.
    pub transfer_timeout: Duration,
}

impl NodeConfig {
    /// Config with protocol defaults and the given display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: DEFAULT_NODE_PORT,
            port_fallback: true,
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
            transfer_port: TRANSFER_PORT,
            transfer_timeout: TRANSFER_TIMEOUT,
        }
    }
}

/// Multicast interface override from the environment, if set and valid.
pub fn multicast_interface_override() -> Option<Ipv4Addr> {
    let var = std::env::var(MULTICAST_IF_ENV).ok()?;
    match var.parse::<Ipv4Addr>() {
        Ok(addr) => {
            log::debug!("[CFG] using {}={}", MULTICAST_IF_ENV, addr);
            Some(addr)
        }
        Err(_) => {
            log::warn!("[CFG] invalid {}='{}', ignoring", MULTICAST_IF_ENV, var);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ports_disjoint() {
        for port in FALLBACK_PORTS {
            assert_ne!(port, MULTICAST_PORT);
            assert_ne!(port, TRANSFER_PORT);
        }
    }

    #[test]
    fn test_default_config() {
        let cfg = NodeConfig::new("board-1");
        assert_eq!(cfg.port, DEFAULT_NODE_PORT);
        assert!(cfg.port_fallback);
        assert_eq!(cfg.multicast_group, MULTICAST_GROUP);
    }
}
