// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! # sketchwire - serverless shared-whiteboard networking
//!
//! The networking core of a LAN-collaborative whiteboard: peers discover
//! each other over IP multicast, exchange drawing operations as fixed-width
//! ASCII datagrams, and keep per-origin causal order with built-in loss
//! recovery. There is no server and no coordinator; every peer is equal.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sketchwire::{Color, DrawOp, Node, Point, Result};
//!
//! fn main() -> Result<()> {
//!     // Join (or start) the whiteboard session on this LAN.
//!     let node = Node::builder("my-board").start()?;
//!
//!     // Publish a stroke to every peer.
//!     node.publish(DrawOp::Line {
//!         start: Point::new(10, 20),
//!         end: Point::new(300, 400),
//!         color: Color::new(0xFF, 0x00, 0xFF),
//!         weight: 3,
//!     })?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         Node                                 |
//! |   builder | listener loop | publish | snapshot hand-off      |
//! +--------------------------------------------------------------+
//! |   Delivery                    |   Discovery                  |
//! |   per-origin causal chains    |   multicast announce/reply   |
//! |   pending buffer + recovery   |   peer directory             |
//! +--------------------------------------------------------------+
//! |   Protocol                    |   Transfer                   |
//! |   fixed-width ASCII codec     |   one-shot TCP bulk streams  |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Node`] | One whiteboard peer: sockets, threads, lifecycle |
//! | [`DrawOp`] | A drawing operation (line, rectangle, text, ...) |
//! | [`Message`] | Id header plus body, the unit of the wire protocol |
//! | [`DeliveryEngine`] | Per-origin causal gating, history and recovery |
//! | [`CanvasHandler`] | Canvas-side callbacks the core drives |

pub mod config;
pub mod delivery;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod node;
pub mod protocol;
pub mod transfer;

pub use config::NodeConfig;
pub use delivery::loss::LossSimulator;
pub use delivery::replay::ReplayController;
pub use delivery::{DeliveryEngine, IdGenerator, Verdict};
pub use directory::PeerDirectory;
pub use discovery::{ConnectionState, DiscoveryService};
pub use error::{Error, Result};
pub use node::{CanvasHandler, MemoryCanvas, Node, NodeBuilder, NodeEvent};
pub use protocol::codec::{decode, encode, max_encoded_len, DecodeError};
pub use protocol::{
    Body, Color, DrawOp, FontSpec, FontStyle, Host, ImageRequest, Message, MessageId,
    PacketRequest, Point,
};

/// Library version from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
