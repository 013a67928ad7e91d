// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! The set of known remote peers.
//!
//! Invariant: the directory never contains the local host, and insertion is
//! idempotent. Read by the listener threads, written by listener and
//! discovery threads, so all access goes through one lock.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::protocol::Host;

/// Known remote endpoints, with self-exclusion and de-duplication.
pub struct PeerDirectory {
    local: Host,
    peers: RwLock<HashSet<Host>>,
}

impl PeerDirectory {
    /// Directory for a peer identifying itself as `local`.
    pub fn new(local: Host) -> Self {
        Self {
            local,
            peers: RwLock::new(HashSet::new()),
        }
    }

    /// The local host this directory excludes.
    pub fn local(&self) -> &Host {
        &self.local
    }

    /// Add a peer. Returns `false` when the host is the local host or is
    /// already known.
    pub fn insert(&self, host: Host) -> bool {
        if host == self.local {
            return false;
        }
        let added = self.peers.write().insert(host.clone());
        if added {
            log::info!("[DIR] added peer {}", host);
        } else {
            log::debug!("[DIR] peer {} already known", host);
        }
        added
    }

    /// Remove a peer (leave handling). Returns `false` if it was unknown.
    pub fn remove(&self, host: &Host) -> bool {
        let removed = self.peers.write().remove(host);
        if removed {
            log::info!("[DIR] removed peer {}", host);
        }
        removed
    }

    /// Whether the host is currently known.
    pub fn contains(&self, host: &Host) -> bool {
        self.peers.read().contains(host)
    }

    /// Copy of the current peer set, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<Host> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Drop every entry (disconnect).
    pub fn clear(&self) {
        self.peers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host(name: &str, port: u16) -> Host {
        Host::new(name, Ipv4Addr::new(10, 0, 0, 1), port)
    }

    #[test]
    fn test_self_exclusion() {
        let dir = PeerDirectory::new(host("me", 55551));
        assert!(!dir.insert(host("me", 55551)));
        assert!(dir.is_empty());
    }

    #[test]
    fn test_deduplication() {
        let dir = PeerDirectory::new(host("me", 55551));
        assert!(dir.insert(host("other", 55552)));
        assert!(!dir.insert(host("other", 55552)));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_structural_identity_distinguishes_ports() {
        let dir = PeerDirectory::new(host("me", 55551));
        assert!(dir.insert(host("other", 55552)));
        assert!(dir.insert(host("other", 55553)));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = PeerDirectory::new(host("me", 55551));
        let peer = host("other", 55552);
        dir.insert(peer.clone());
        assert!(dir.remove(&peer));
        assert!(!dir.remove(&peer));
        dir.insert(peer);
        dir.clear();
        assert!(dir.is_empty());
    }
}
