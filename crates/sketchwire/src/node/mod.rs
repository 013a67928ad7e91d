// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Node orchestration: one whiteboard peer.
//!
//! A [`Node`] owns the unicast socket, the peer directory, the delivery
//! engine, the loss simulator and the discovery service, and runs the main
//! listener loop. Everything is explicitly constructed through
//! [`Node::builder`]; there is no process-global state, so two nodes can
//! share a process (and the integration tests do exactly that).
//!
//! Canvas state itself stays behind the [`CanvasHandler`] trait. The
//! networking core applies operations to it, serves its snapshot to joining
//! peers and stores fetched image payloads, but never interprets pixels.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::{self, NodeConfig, DISCOVERY_WINDOW, FALLBACK_PORTS, SOCKET_READ_TIMEOUT};
use crate::delivery::loss::LossSimulator;
use crate::delivery::replay::ReplayController;
use crate::delivery::{DeliveryEngine, IdGenerator, Verdict};
use crate::directory::PeerDirectory;
use crate::discovery::{ConnectionState, DiscoveryService};
use crate::error::{Error, Result};
use crate::protocol::codec;
use crate::protocol::{Body, DrawOp, Host, ImageRequest, Message, MessageId, PacketRequest};
use crate::transfer;

/// Canvas-side callbacks invoked by the networking core.
///
/// Implementations must be thread-safe: operations are applied from the
/// listener thread, snapshots are taken from short-lived transfer threads.
pub trait CanvasHandler: Send + Sync {
    /// Apply one delivered drawing operation.
    fn apply(&self, op: &DrawOp);

    /// Serialize the full canvas for a joining peer.
    fn snapshot(&self) -> Vec<u8>;

    /// Replace the canvas with a received snapshot.
    fn restore(&self, data: &[u8]);

    /// Image payload by content hash, if this canvas holds it.
    fn image(&self, hash: u32) -> Option<Vec<u8>>;

    /// Store an image payload fetched from a peer.
    fn store_image(&self, hash: u32, data: Vec<u8>);
}

/// In-memory canvas: an ordered log of operations plus an image store.
///
/// The default handler; sufficient for headless nodes and tests. Snapshots
/// are newline-separated encoded drawing messages.
pub struct MemoryCanvas {
    ops: Mutex<Vec<DrawOp>>,
    images: Mutex<std::collections::HashMap<u32, Vec<u8>>>,
}

impl MemoryCanvas {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            images: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Copy of the applied operation log.
    pub fn ops(&self) -> Vec<DrawOp> {
        self.ops.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }
}

impl Default for MemoryCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasHandler for MemoryCanvas {
    fn apply(&self, op: &DrawOp) {
        self.ops.lock().push(op.clone());
    }

    fn snapshot(&self) -> Vec<u8> {
        let ops = self.ops.lock();
        let mut out = Vec::new();
        for op in ops.iter() {
            out.extend_from_slice(&codec::encode(&Message::unstamped(Body::Draw(op.clone()))));
            out.push(b'\n');
        }
        out
    }

    fn restore(&self, data: &[u8]) {
        let mut ops = Vec::new();
        for line in data.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match codec::decode(line) {
                Ok(Message {
                    body: Body::Draw(op),
                    ..
                }) => ops.push(op),
                Ok(_) => log::debug!("[NODE] non-drawing entry in snapshot, skipping"),
                Err(e) => log::warn!("[NODE] bad snapshot entry: {}", e),
            }
        }
        *self.ops.lock() = ops;
    }

    fn image(&self, hash: u32) -> Option<Vec<u8>> {
        self.images.lock().get(&hash).cloned()
    }

    fn store_image(&self, hash: u32, data: Vec<u8>) {
        self.images.lock().insert(hash, data);
    }
}

/// Observable node activity, delivered on the channel from
/// [`Node::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    PeerAdded(Host),
    PeerRemoved(Host),
    /// Snapshot streamed to a joining peer.
    SnapshotServed(Host),
    /// Snapshot received and restored, with its byte length.
    SnapshotReceived(usize),
    /// No peer streamed a snapshot within the transfer timeout.
    SnapshotTimedOut,
    /// Recovery request multicast for a missing message.
    RecoveryRequested(MessageId),
    /// Image payload fetched and stored, by content hash.
    ImageStored(u32),
}

/// Builder for [`Node`]; see [`Node::builder`].
pub struct NodeBuilder {
    config: NodeConfig,
    handler: Option<Arc<dyn CanvasHandler>>,
    origin: Option<u32>,
}

impl NodeBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn port_fallback(mut self, enabled: bool) -> Self {
        self.config.port_fallback = enabled;
        self
    }

    pub fn multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.config.multicast_group = group;
        self.config.multicast_port = port;
        self
    }

    pub fn transfer(mut self, port: u16, timeout: Duration) -> Self {
        self.config.transfer_port = port;
        self.config.transfer_timeout = timeout;
        self
    }

    /// Fixed origin nonce for the delivery engine (deterministic tests).
    pub fn origin(mut self, origin: u32) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn CanvasHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind sockets, join the multicast group, announce, and start the
    /// listener threads. Blocks for at most the discovery window waiting
    /// for an existing session to answer.
    pub fn start(self) -> Result<Node> {
        Node::start(self)
    }
}

/// One whiteboard peer: sockets, threads and shared state.
pub struct Node {
    local: Host,
    config: NodeConfig,
    socket: UdpSocket,
    directory: Arc<PeerDirectory>,
    engine: Arc<DeliveryEngine>,
    loss: Arc<LossSimulator>,
    handler: Arc<dyn CanvasHandler>,
    discovery: Arc<DiscoveryService>,
    state: Arc<Mutex<ConnectionState>>,
    running: Arc<AtomicBool>,
    listener: Option<thread::JoinHandle<()>>,
    events_rx: Receiver<NodeEvent>,
}

impl Node {
    /// Builder with protocol defaults and the given display name.
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            config: NodeConfig::new(name),
            handler: None,
            origin: None,
        }
    }

    fn start(builder: NodeBuilder) -> Result<Node> {
        let config = builder.config;
        let handler = builder
            .handler
            .unwrap_or_else(|| Arc::new(MemoryCanvas::new()));
        let engine = Arc::new(match builder.origin {
            Some(origin) => DeliveryEngine::with_ids(IdGenerator::with_origin(origin)),
            None => DeliveryEngine::new(),
        });

        let socket = bind_unicast(&config)?;
        socket.set_read_timeout(Some(SOCKET_READ_TIMEOUT))?;
        let port = socket.local_addr()?.port();
        let local = Host::new(config.name.clone(), local_ipv4(), port);
        log::info!("[NODE] {} listening on port {}", local, port);

        let directory = Arc::new(PeerDirectory::new(local.clone()));
        let loss = Arc::new(LossSimulator::new());
        let state = Arc::new(Mutex::new(ConnectionState::Discovering));
        let running = Arc::new(AtomicBool::new(true));
        let (forward_tx, forward_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();

        let discovery = Arc::new(DiscoveryService::start(
            local.clone(),
            config.multicast_group,
            config.multicast_port,
            Arc::clone(&directory),
            forward_tx,
        )?);

        // Announce before starting the listener; replies queue in the
        // unicast socket buffer until the loop picks them up. An announce
        // failure here tears everything down cleanly.
        discovery.announce()?;

        let worker = Worker {
            local: local.clone(),
            socket: socket.try_clone()?,
            directory: Arc::clone(&directory),
            engine: Arc::clone(&engine),
            loss: Arc::clone(&loss),
            handler: Arc::clone(&handler),
            discovery: Arc::clone(&discovery),
            forward: forward_rx,
            events: events_tx,
            state: Arc::clone(&state),
            running: Arc::clone(&running),
            transfer_port: config.transfer_port,
            transfer_timeout: config.transfer_timeout,
        };
        let listener = thread::Builder::new()
            .name("sw-node".into())
            .spawn(move || worker.run())
            .map_err(|e| Error::InvalidState(format!("listener thread: {}", e)))?;

        // Wait for an existing session to answer. Silence means this node
        // starts the session.
        let deadline = Instant::now() + DISCOVERY_WINDOW;
        while Instant::now() < deadline {
            if *state.lock() == ConnectionState::Connected {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        {
            let mut st = state.lock();
            if *st == ConnectionState::Discovering {
                log::info!("[NODE] no replies, starting a new session");
                *st = ConnectionState::Connected;
            }
        }

        Ok(Node {
            local,
            config,
            socket,
            directory,
            engine,
            loss,
            handler,
            discovery,
            state,
            running,
            listener: Some(listener),
            events_rx,
        })
    }

    pub fn local(&self) -> &Host {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Known remote peers.
    pub fn peers(&self) -> Vec<Host> {
        self.directory.snapshot()
    }

    /// Event stream; clone-per-subscriber.
    pub fn events(&self) -> Receiver<NodeEvent> {
        self.events_rx.clone()
    }

    /// Set the inbound loss simulation ratio; returns the clamped value.
    pub fn set_loss_ratio(&self, percent: i32) -> u8 {
        self.loss.set_ratio(percent)
    }

    /// Stamp a local drawing operation and send it to every known peer.
    pub fn publish(&self, op: DrawOp) -> Result<Message> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(Error::InvalidState("publish while not connected".into()));
        }
        let msg = self.engine.stamp(Body::Draw(op.clone()));
        self.handler.apply(&op);
        let bytes = codec::encode(&msg);
        for peer in self.directory.snapshot() {
            if let Err(e) = self.socket.send_to(&bytes, peer.addr()) {
                log::warn!("[NODE] send to {} failed: {}", peer, e);
            }
        }
        Ok(msg)
    }

    /// Applied-history length (delivered drawing messages).
    pub fn history_len(&self) -> usize {
        self.engine.history_len()
    }

    /// Start a paced replay of the session history onto the canvas.
    ///
    /// Stalls on holes in the history multicast a recovery request and
    /// retry; the returned controller cancels the replay when dropped.
    pub fn start_replay(&self, tick: Duration) -> ReplayController {
        let handler = Arc::clone(&self.handler);
        let discovery = Arc::clone(&self.discovery);
        let local = self.local.clone();
        ReplayController::spawn(
            Arc::clone(&self.engine),
            tick,
            move |msg: &Message| {
                if let Body::Draw(ref op) = msg.body {
                    handler.apply(op);
                }
            },
            move |missing: &[MessageId]| {
                for id in missing {
                    let req = Message::unstamped(Body::PacketRequest(PacketRequest {
                        source_ip: local.ip,
                        source_port: local.port,
                        missing: *id,
                    }));
                    if let Err(e) = discovery.multicast(&req) {
                        log::warn!("[NODE] replay recovery request failed: {}", e);
                    }
                }
            },
        )
    }

    /// Leave the session: notify peers, stop threads, close sockets.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        {
            let mut st = self.state.lock();
            if *st == ConnectionState::Disconnected {
                return;
            }
            *st = ConnectionState::Disconnecting;
        }
        log::info!("[NODE] {} leaving", self.local);
        let leave = codec::encode(&Message::unstamped(Body::Leave(self.local.clone())));
        for peer in self.directory.snapshot() {
            if let Err(e) = self.socket.send_to(&leave, peer.addr()) {
                log::debug!("[NODE] leave notice to {} failed: {}", peer, e);
            }
        }
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        self.discovery.stop();
        self.directory.clear();
        *self.state.lock() = ConnectionState::Disconnected;
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the unicast socket, walking the fallback ports when enabled.
fn bind_unicast(config: &NodeConfig) -> Result<UdpSocket> {
    let mut candidates = vec![config.port];
    if config.port_fallback {
        for port in FALLBACK_PORTS {
            if port != config.port {
                candidates.push(port);
            }
        }
    }
    let mut last = None;
    for port in candidates {
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(socket) => {
                if port != config.port {
                    log::info!("[NODE] port {} taken, fell back to {}", config.port, port);
                }
                return Ok(socket);
            }
            Err(e) => last = Some((port, e)),
        }
    }
    match last {
        Some((port, e)) => Err(Error::Bind(format!("port {}: {}", port, e))),
        None => Err(Error::Bind("no candidate ports".into())),
    }
}

/// Best-effort local IPv4, loopback when no interface is usable.
fn local_ipv4() -> Ipv4Addr {
    if let Some(ip) = config::multicast_interface_override() {
        return ip;
    }
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) => ip,
        Ok(addr) => {
            log::warn!("[NODE] local address {} is not IPv4, using loopback", addr);
            Ipv4Addr::LOCALHOST
        }
        Err(e) => {
            log::warn!("[NODE] local address lookup failed ({}), using loopback", e);
            Ipv4Addr::LOCALHOST
        }
    }
}

/// Main listener loop state, moved onto the `sw-node` thread.
struct Worker {
    local: Host,
    socket: UdpSocket,
    directory: Arc<PeerDirectory>,
    engine: Arc<DeliveryEngine>,
    loss: Arc<LossSimulator>,
    handler: Arc<dyn CanvasHandler>,
    discovery: Arc<DiscoveryService>,
    forward: Receiver<(Message, SocketAddr)>,
    events: Sender<NodeEvent>,
    state: Arc<Mutex<ConnectionState>>,
    running: Arc<AtomicBool>,
    transfer_port: u16,
    transfer_timeout: Duration,
}

impl Worker {
    fn run(self) {
        let mut buf = vec![0u8; codec::max_encoded_len()];
        while self.running.load(Ordering::Relaxed) {
            // Promote deferred messages whose predecessor arrived.
            for msg in self.engine.drain_pending() {
                if let Body::Draw(ref op) = msg.body {
                    self.apply(op);
                }
            }
            // Throttled recovery for deferrals that are still blocked.
            for missing in self.engine.overdue() {
                self.request_missing(missing);
            }
            // Multicast traffic forwarded by the discovery listener.
            while let Ok((msg, src)) = self.forward.try_recv() {
                self.dispatch(msg, src);
            }
            // One bounded unicast receive; the timeout is the loop tick.
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => match codec::decode(&buf[..len]) {
                    Ok(msg) => self.dispatch(msg, src),
                    Err(e) => log::debug!("[NODE] undecodable datagram from {}: {}", src, e),
                },
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        log::warn!("[NODE] recv failed: {}", e);
                    }
                }
            }
        }
        log::debug!("[NODE] listener for {} stopped", self.local);
    }

    fn dispatch(&self, msg: Message, src: SocketAddr) {
        log::trace!("[NODE] {} from {}", msg.body.kind(), src);
        match msg.body {
            Body::Draw(_) => self.on_draw(msg),
            Body::DiscoveryReply(host) => self.on_discovery_reply(host),
            Body::Join(host) => self.on_join(host),
            Body::Leave(host) => {
                if self.directory.remove(&host) {
                    let _ = self.events.send(NodeEvent::PeerRemoved(host));
                }
            }
            Body::PacketRequest(req) => self.on_packet_request(req),
            Body::ImageRequest(req) => self.on_image_request(req),
            // Announcements are handled on the discovery thread.
            Body::Discovery(_) => {}
        }
    }

    fn on_draw(&self, msg: Message) {
        if self.loss.should_drop() {
            log::debug!("[LOSS] dropped inbound {}", msg.body.kind());
            return;
        }
        let body = msg.body.clone();
        match self.engine.receive(msg) {
            Verdict::Apply => {
                if let Body::Draw(ref op) = body {
                    self.apply(op);
                }
            }
            Verdict::Defer | Verdict::Duplicate => {}
        }
    }

    fn apply(&self, op: &DrawOp) {
        self.handler.apply(op);
        // An image reference we cannot render yet needs its payload.
        if let DrawOp::ImageRef { hash, .. } = *op {
            if self.handler.image(hash).is_none() {
                self.fetch_image(hash);
            }
        }
    }

    fn on_discovery_reply(&self, host: Host) {
        if self.directory.insert(host.clone()) {
            let _ = self.events.send(NodeEvent::PeerAdded(host.clone()));
        }
        let first_reply = {
            let mut st = self.state.lock();
            if *st == ConnectionState::Discovering {
                *st = ConnectionState::Connected;
                true
            } else {
                false
            }
        };
        // The first replying peer serves the session snapshot.
        if first_reply {
            self.fetch_snapshot(host);
        }
    }

    fn fetch_snapshot(&self, from: Host) {
        let socket = match self.socket.try_clone() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[NODE] snapshot fetch skipped: {}", e);
                return;
            }
        };
        let join = codec::encode(&Message::unstamped(Body::Join(self.local.clone())));
        let handler = Arc::clone(&self.handler);
        let events = self.events.clone();
        let port = self.transfer_port;
        let timeout = self.transfer_timeout;
        spawn_detached("sw-snapshot-rx", move || {
            // The sender delays before connecting, so requesting first and
            // binding second is safe.
            if let Err(e) = socket.send_to(&join, from.addr()) {
                log::warn!("[NODE] join to {} failed: {}", from, e);
                return;
            }
            match transfer::receive_stream(port, timeout) {
                Ok(Some(data)) => {
                    handler.restore(&data);
                    log::info!("[NODE] restored {} byte snapshot from {}", data.len(), from);
                    let _ = events.send(NodeEvent::SnapshotReceived(data.len()));
                }
                Ok(None) => {
                    let _ = events.send(NodeEvent::SnapshotTimedOut);
                }
                Err(e) => log::warn!("[NODE] snapshot receive failed: {}", e),
            }
        });
    }

    fn on_join(&self, host: Host) {
        if self.directory.insert(host.clone()) {
            let _ = self.events.send(NodeEvent::PeerAdded(host.clone()));
        }
        let data = self.handler.snapshot();
        let events = self.events.clone();
        let addr = SocketAddr::new(IpAddr::V4(host.ip), self.transfer_port);
        let timeout = self.transfer_timeout;
        spawn_detached("sw-snapshot-tx", move || {
            match transfer::send_stream(addr, &data, timeout) {
                Ok(()) => {
                    let _ = events.send(NodeEvent::SnapshotServed(host));
                }
                Err(e) => log::warn!("[NODE] snapshot to {} failed: {}", host, e),
            }
        });
    }

    fn on_packet_request(&self, req: PacketRequest) {
        if req.source_ip == self.local.ip && req.source_port == self.local.port {
            // Our own multicast request looped back.
            return;
        }
        let Some(stored) = self.engine.lookup(req.missing) else {
            return;
        };
        log::info!("[NODE] serving recovery of {} to {}", req.missing, req.source_ip);
        let dst = SocketAddr::new(IpAddr::V4(req.source_ip), req.source_port);
        if let Err(e) = self.socket.send_to(&codec::encode(&stored), dst) {
            log::warn!("[NODE] recovery send to {} failed: {}", dst, e);
        }
    }

    fn on_image_request(&self, req: ImageRequest) {
        let Some(data) = self.handler.image(req.hash) else {
            log::debug!("[NODE] no payload for image {:010}", req.hash);
            return;
        };
        let addr = SocketAddr::new(IpAddr::V4(req.source_ip), self.transfer_port);
        let timeout = self.transfer_timeout;
        spawn_detached("sw-image-tx", move || {
            if let Err(e) = transfer::send_stream(addr, &data, timeout) {
                log::warn!("[NODE] image payload to {} failed: {}", addr, e);
            }
        });
    }

    /// Multicast an image request and wait for any holder to stream the
    /// payload to our transfer port. The port accepts one connection, so
    /// only the first responder is read.
    fn fetch_image(&self, hash: u32) {
        let req = Message::unstamped(Body::ImageRequest(ImageRequest {
            source_ip: self.local.ip,
            hash,
        }));
        let discovery = Arc::clone(&self.discovery);
        let handler = Arc::clone(&self.handler);
        let events = self.events.clone();
        let port = self.transfer_port;
        let timeout = self.transfer_timeout;
        spawn_detached("sw-image-rx", move || {
            if let Err(e) = discovery.multicast(&req) {
                log::warn!("[NODE] image request failed: {}", e);
                return;
            }
            match transfer::receive_stream(port, timeout) {
                Ok(Some(data)) => {
                    handler.store_image(hash, data);
                    let _ = events.send(NodeEvent::ImageStored(hash));
                }
                Ok(None) => log::info!("[NODE] no peer served image {:010}", hash),
                Err(e) => log::warn!("[NODE] image receive failed: {}", e),
            }
        });
    }

    fn request_missing(&self, missing: MessageId) {
        let req = Message::unstamped(Body::PacketRequest(PacketRequest {
            source_ip: self.local.ip,
            source_port: self.local.port,
            missing,
        }));
        log::info!("[NODE] requesting recovery of {}", missing);
        match self.discovery.multicast(&req) {
            Ok(()) => {
                let _ = self.events.send(NodeEvent::RecoveryRequested(missing));
            }
            Err(e) => log::warn!("[NODE] recovery request failed: {}", e),
        }
    }
}

/// Spawn a short-lived worker thread; spawn failure is logged, not fatal.
fn spawn_detached(name: &str, f: impl FnOnce() + Send + 'static) {
    if let Err(e) = thread::Builder::new().name(name.into()).spawn(f) {
        log::error!("[NODE] failed to spawn {}: {}", name, e);
    }
}
