// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Wire protocol data model.
//!
//! Every protocol message is a [`Message`]: a fixed-width id header
//! (unique id + required predecessor id) plus a closed [`Body`] sum type.
//! Messages are immutable value objects; they are created either by
//! [`crate::delivery::DeliveryEngine::stamp`] for local emissions or by
//! [`codec::decode`] for inbound datagrams, and never mutated afterwards.
//!
//! The causal chain is strictly per-origin: `required_id` names the previous
//! message *from the same peer*, nothing more. Concurrent emissions from
//! different peers are unordered with respect to one another.

pub mod codec;
pub mod fields;

use std::fmt;
use std::net::Ipv4Addr;

/// Width of an encoded [`MessageId`] in wire characters.
pub const ID_WIDTH: usize = 16;

/// Fill character marking an absent id slot on the wire.
pub const ID_FILL: u8 = b'-';

/// Opaque message token: origin nonce in the high 32 bits, per-origin
/// sequence in the low 32. Encoded as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Compose an id from an origin nonce and a sequence number.
    pub fn compose(origin: u32, seq: u32) -> Self {
        Self((u64::from(origin) << 32) | u64::from(seq))
    }

    /// Origin nonce of the emitting peer.
    pub fn origin(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Per-origin sequence number.
    pub fn seq(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of a peer: display name plus unicast endpoint.
///
/// Equality is structural over all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
        }
    }

    /// Unicast socket address of this peer.
    pub fn addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(std::net::IpAddr::V4(self.ip), self.port)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.ip, self.port)
    }
}

/// Canvas coordinate, encoded as two 4-digit zero-padded decimals.
///
/// Values above 9999 are clamped on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

impl Point {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// RGB color, encoded as 6 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Font style digit on the wire: plain 0, bold 1, italic 2, bold-italic 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
    #[default]
    Plain,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub fn as_digit(self) -> u8 {
        match self {
            FontStyle::Plain => 0,
            FontStyle::Bold => 1,
            FontStyle::Italic => 2,
            FontStyle::BoldItalic => 3,
        }
    }

    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(FontStyle::Plain),
            1 => Some(FontStyle::Bold),
            2 => Some(FontStyle::Italic),
            3 => Some(FontStyle::BoldItalic),
            _ => None,
        }
    }
}

/// Font block for text operations: padded name, style digit, underline
/// flag, 2-digit size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSpec {
    /// Family name; occupies a fixed 20-char space-padded block.
    pub name: String,
    pub style: FontStyle,
    pub underline: bool,
    /// Point size, clamped to 99 on encode.
    pub size: u8,
}

impl FontSpec {
    pub fn new(name: impl Into<String>, style: FontStyle, underline: bool, size: u8) -> Self {
        Self {
            name: name.into(),
            style,
            underline,
            size,
        }
    }
}

/// One drawing operation. Geometry and stroke metadata only; image bytes
/// never ride in a datagram ([`DrawOp::ImageRef`] carries a content hash).
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Line {
        start: Point,
        end: Point,
        color: Color,
        weight: u8,
    },
    /// One edge of a polygon; causally chained to the previous edge.
    Polygon {
        start: Point,
        end: Point,
        color: Color,
        weight: u8,
    },
    /// One segment of a freeform stroke; chained like polygon edges.
    Freeform {
        start: Point,
        end: Point,
        color: Color,
        weight: u8,
    },
    Rectangle {
        start: Point,
        end: Point,
        color: Color,
        filled: bool,
        bordered: bool,
        border_color: Color,
        border_weight: u8,
    },
    Text {
        origin: Point,
        color: Color,
        ch: char,
        font: FontSpec,
    },
    /// Reference to an out-of-band image payload, fetched over bulk
    /// transfer by hash.
    ImageRef {
        origin: Point,
        hash: u32,
        scale: f32,
    },
}

impl DrawOp {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DrawOp::Line { .. } => "line",
            DrawOp::Polygon { .. } => "polygon",
            DrawOp::Freeform { .. } => "freeform",
            DrawOp::Rectangle { .. } => "rectangle",
            DrawOp::Text { .. } => "text",
            DrawOp::ImageRef { .. } => "image",
        }
    }

    /// Canonical origin and extent for a rectangle, tolerating an end
    /// corner above or left of the start corner.
    ///
    /// Returns `None` for non-rectangle operations.
    pub fn normalized_rect(&self) -> Option<(Point, (u16, u16))> {
        match self {
            DrawOp::Rectangle { start, end, .. } => {
                let origin = Point::new(start.x.min(end.x), start.y.min(end.y));
                let extent = (start.x.abs_diff(end.x), start.y.abs_diff(end.y));
                Some((origin, extent))
            }
            _ => None,
        }
    }
}

/// Recovery request: "whoever holds `missing`, unicast it to me directly."
///
/// On the wire the missing id occupies the required-id header slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRequest {
    pub source_ip: Ipv4Addr,
    pub source_port: u16,
    pub missing: MessageId,
}

/// Out-of-band image fetch: "send the payload for `hash` to my transfer
/// port."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source_ip: Ipv4Addr,
    pub hash: u32,
}

/// Closed sum of every protocol message kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// A drawing operation; the only causally-gated kind.
    Draw(DrawOp),
    /// Multicast "I am looking for peers."
    Discovery(Host),
    /// Unicast reply to a discovery from a previously unknown sender.
    DiscoveryReply(Host),
    /// Unicast "send me the current canvas over bulk transfer."
    Join(Host),
    /// Unicast "remove me from your peer set."
    Leave(Host),
    /// Multicast recovery request for a missing predecessor.
    PacketRequest(PacketRequest),
    /// Unicast request for an image payload by content hash.
    ImageRequest(ImageRequest),
}

impl Body {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Draw(op) => op.kind(),
            Body::Discovery(_) => "discovery",
            Body::DiscoveryReply(_) => "discovery-reply",
            Body::Join(_) => "join",
            Body::Leave(_) => "leave",
            Body::PacketRequest(_) => "packet-request",
            Body::ImageRequest(_) => "image-request",
        }
    }
}

/// A protocol message: id header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Identity token; set by the delivery engine for draw messages,
    /// absent (`-` fill on the wire) for control messages.
    pub unique_id: Option<MessageId>,
    /// Predecessor in the origin's local chain; absent for the first
    /// emission and for non-causal messages.
    pub required_id: Option<MessageId>,
    pub body: Body,
}

impl Message {
    /// Message with no causal stamp (control messages, drafts).
    pub fn unstamped(body: Body) -> Self {
        Self {
            unique_id: None,
            required_id: None,
            body,
        }
    }
}
