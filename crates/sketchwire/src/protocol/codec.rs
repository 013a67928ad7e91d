// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Message encode/decode against the fixed-layout textual wire format.
//!
//! Layout: 16-char unique id, 16-char required id (both `-`-filled when
//! absent), a one-char type tag, then variant fields at statically known
//! offsets (see [`super::fields`]). Decoding validates every field width
//! and yields [`DecodeError`] on any violation; listener loops log and drop
//! such datagrams rather than crash.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use super::fields::{self, FONT_LEN, HASH_LEN, IP_LEN, NAME_LEN, PORT_LEN, SCALE_LEN};
use super::{
    Body, Color, DrawOp, FontSpec, FontStyle, Host, ImageRequest, Message, MessageId,
    PacketRequest, Point, ID_WIDTH,
};

/// Byte offset of the type tag (after both id slots).
pub const TAG_OFFSET: usize = ID_WIDTH * 2;
/// Byte offset of the first variant-specific field.
pub const PAYLOAD_OFFSET: usize = TAG_OFFSET + 1;

// Type tags. The first five match the original deployment; recovery and
// image fetch complete the closed set.
const TAG_DRAW: u8 = b'd';
const TAG_DISCOVERY: u8 = b'f';
const TAG_REPLY: u8 = b'r';
const TAG_JOIN: u8 = b'j';
const TAG_LEAVE: u8 = b'l';
const TAG_PACKET_REQUEST: u8 = b'p';
const TAG_IMAGE_REQUEST: u8 = b'i';

// Draw mode chars.
const MODE_LINE: u8 = b'L';
const MODE_POLYGON: u8 = b'P';
const MODE_FREEFORM: u8 = b'F';
const MODE_RECTANGLE: u8 = b'R';
const MODE_TEXT: u8 = b'T';
const MODE_IMAGE: u8 = b'I';

/// Why a datagram failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Shorter than the id header + tag.
    Truncated { got: usize },
    /// Payload width does not match the tagged variant.
    Length { expected: usize, got: usize },
    /// Non-ASCII bytes in a textual message.
    NotAscii,
    /// Unrecognized type tag byte.
    UnknownTag(char),
    /// Unrecognized draw mode char.
    UnknownMode(char),
    /// A field failed width or numeric validation.
    BadField(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { got } => {
                write!(f, "message truncated ({} bytes, header needs {})", got, PAYLOAD_OFFSET)
            }
            DecodeError::Length { expected, got } => {
                write!(f, "payload length {} does not match variant ({})", got, expected)
            }
            DecodeError::NotAscii => write!(f, "message contains non-ASCII bytes"),
            DecodeError::UnknownTag(c) => write!(f, "unknown type tag '{}'", c),
            DecodeError::UnknownMode(c) => write!(f, "unknown draw mode '{}'", c),
            DecodeError::BadField(field) => write!(f, "invalid {} field", field),
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== Encode =====

/// Encode a message into its wire bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut out = String::with_capacity(max_encoded_len());
    encode_into(msg, &mut out);
    out.into_bytes()
}

/// Encode into a caller-provided buffer. Kept separate from [`encode`] so
/// the [`max_encoded_len`] initializer can encode without re-entering its
/// own `OnceLock` (which would deadlock).
fn encode_into(msg: &Message, out: &mut String) {
    fields::encode_id_slot(msg.unique_id, out);
    // The recovery request names its missing id in the required slot.
    let required = match &msg.body {
        Body::PacketRequest(req) => Some(req.missing),
        _ => msg.required_id,
    };
    fields::encode_id_slot(required, out);

    match &msg.body {
        Body::Draw(op) => {
            out.push(TAG_DRAW as char);
            encode_draw(op, out);
        }
        Body::Discovery(host) => encode_host(TAG_DISCOVERY, host, out),
        Body::DiscoveryReply(host) => encode_host(TAG_REPLY, host, out),
        Body::Join(host) => encode_host(TAG_JOIN, host, out),
        Body::Leave(host) => encode_host(TAG_LEAVE, host, out),
        Body::PacketRequest(req) => {
            out.push(TAG_PACKET_REQUEST as char);
            fields::encode_ip(req.source_ip, out);
            fields::encode_port(req.source_port, out);
        }
        Body::ImageRequest(req) => {
            out.push(TAG_IMAGE_REQUEST as char);
            fields::encode_ip(req.source_ip, out);
            fields::encode_hash(req.hash, out);
        }
    }
}

fn encode_host(tag: u8, host: &Host, out: &mut String) {
    out.push(tag as char);
    fields::encode_name(&host.name, out);
    fields::encode_ip(host.ip, out);
    fields::encode_port(host.port, out);
}

fn encode_draw(op: &DrawOp, out: &mut String) {
    match op {
        DrawOp::Line { start, end, color, weight }
        | DrawOp::Polygon { start, end, color, weight }
        | DrawOp::Freeform { start, end, color, weight } => {
            out.push(match op {
                DrawOp::Line { .. } => MODE_LINE as char,
                DrawOp::Polygon { .. } => MODE_POLYGON as char,
                _ => MODE_FREEFORM as char,
            });
            fields::encode_point(*start, out);
            fields::encode_point(*end, out);
            fields::encode_color(*color, out);
            fields::encode_weight(*weight, out);
        }
        DrawOp::Rectangle {
            start,
            end,
            color,
            filled,
            bordered,
            border_color,
            border_weight,
        } => {
            out.push(MODE_RECTANGLE as char);
            fields::encode_point(*start, out);
            fields::encode_point(*end, out);
            fields::encode_color(*color, out);
            fields::encode_bool(*filled, out);
            fields::encode_bool(*bordered, out);
            fields::encode_color(*border_color, out);
            fields::encode_weight(*border_weight, out);
        }
        DrawOp::Text { origin, color, ch, font } => {
            out.push(MODE_TEXT as char);
            fields::encode_point(*origin, out);
            fields::encode_color(*color, out);
            out.push(if ch.is_ascii() && !ch.is_ascii_control() {
                *ch
            } else {
                '?'
            });
            fields::encode_font(font, out);
        }
        DrawOp::ImageRef { origin, hash, scale } => {
            out.push(MODE_IMAGE as char);
            fields::encode_point(*origin, out);
            fields::encode_hash(*hash, out);
            fields::encode_scale(*scale, out);
        }
    }
}

// ===== Decode =====

/// Decode wire bytes into a message.
///
/// Trailing NUL padding (from fixed-capacity receive buffers) is ignored.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let buf = &buf[..end];

    if buf.len() < PAYLOAD_OFFSET {
        return Err(DecodeError::Truncated { got: buf.len() });
    }
    if !buf.is_ascii() {
        return Err(DecodeError::NotAscii);
    }
    let s = std::str::from_utf8(buf).map_err(|_| DecodeError::NotAscii)?;

    let unique_id = fields::decode_id_slot(&s[..ID_WIDTH])?;
    let required_id = fields::decode_id_slot(&s[ID_WIDTH..TAG_OFFSET])?;
    let tag = buf[TAG_OFFSET];
    let payload = &s[PAYLOAD_OFFSET..];

    let body = match tag {
        TAG_DRAW => Body::Draw(decode_draw(payload)?),
        TAG_DISCOVERY => Body::Discovery(decode_host(payload)?),
        TAG_REPLY => Body::DiscoveryReply(decode_host(payload)?),
        TAG_JOIN => Body::Join(decode_host(payload)?),
        TAG_LEAVE => Body::Leave(decode_host(payload)?),
        TAG_PACKET_REQUEST => {
            expect_len(payload, IP_LEN + PORT_LEN)?;
            let missing = required_id.ok_or(DecodeError::BadField("missing id"))?;
            Body::PacketRequest(PacketRequest {
                source_ip: fields::decode_ip(&payload[..IP_LEN])?,
                source_port: fields::decode_port(&payload[IP_LEN..])?,
                missing,
            })
        }
        TAG_IMAGE_REQUEST => {
            expect_len(payload, IP_LEN + HASH_LEN)?;
            Body::ImageRequest(ImageRequest {
                source_ip: fields::decode_ip(&payload[..IP_LEN])?,
                hash: fields::decode_hash(&payload[IP_LEN..])?,
            })
        }
        other => return Err(DecodeError::UnknownTag(other as char)),
    };

    Ok(Message {
        unique_id,
        required_id,
        body,
    })
}

fn expect_len(payload: &str, expected: usize) -> Result<(), DecodeError> {
    if payload.len() != expected {
        return Err(DecodeError::Length {
            expected,
            got: payload.len(),
        });
    }
    Ok(())
}

fn decode_host(payload: &str) -> Result<Host, DecodeError> {
    expect_len(payload, NAME_LEN + IP_LEN + PORT_LEN)?;
    Ok(Host {
        name: fields::decode_name(&payload[..NAME_LEN])?,
        ip: fields::decode_ip(&payload[NAME_LEN..NAME_LEN + IP_LEN])?,
        port: fields::decode_port(&payload[NAME_LEN + IP_LEN..])?,
    })
}

fn decode_draw(payload: &str) -> Result<DrawOp, DecodeError> {
    const P1: usize = 1;
    const P2: usize = P1 + 8;

    if payload.is_empty() {
        return Err(DecodeError::Length { expected: 1, got: 0 });
    }
    let mode = payload.as_bytes()[0];

    match mode {
        MODE_LINE | MODE_POLYGON | MODE_FREEFORM => {
            expect_len(payload, P2 + 8 + 6 + 2)?;
            let start = fields::decode_point(&payload[P1..P2])?;
            let end = fields::decode_point(&payload[P2..P2 + 8])?;
            let color = fields::decode_color(&payload[P2 + 8..P2 + 14])?;
            let weight = fields::decode_weight(&payload[P2 + 14..])?;
            Ok(match mode {
                MODE_LINE => DrawOp::Line { start, end, color, weight },
                MODE_POLYGON => DrawOp::Polygon { start, end, color, weight },
                _ => DrawOp::Freeform { start, end, color, weight },
            })
        }
        MODE_RECTANGLE => {
            expect_len(payload, P2 + 8 + 6 + 1 + 1 + 6 + 2)?;
            Ok(DrawOp::Rectangle {
                start: fields::decode_point(&payload[P1..P2])?,
                end: fields::decode_point(&payload[P2..P2 + 8])?,
                color: fields::decode_color(&payload[P2 + 8..P2 + 14])?,
                filled: fields::decode_bool(&payload[P2 + 14..P2 + 15])?,
                bordered: fields::decode_bool(&payload[P2 + 15..P2 + 16])?,
                border_color: fields::decode_color(&payload[P2 + 16..P2 + 22])?,
                border_weight: fields::decode_weight(&payload[P2 + 22..])?,
            })
        }
        MODE_TEXT => {
            expect_len(payload, P2 + 6 + 1 + FONT_LEN)?;
            Ok(DrawOp::Text {
                origin: fields::decode_point(&payload[P1..P2])?,
                color: fields::decode_color(&payload[P2..P2 + 6])?,
                ch: payload.as_bytes()[P2 + 6] as char,
                font: fields::decode_font(&payload[P2 + 7..])?,
            })
        }
        MODE_IMAGE => {
            expect_len(payload, P2 + HASH_LEN + SCALE_LEN)?;
            Ok(DrawOp::ImageRef {
                origin: fields::decode_point(&payload[P1..P2])?,
                hash: fields::decode_hash(&payload[P2..P2 + HASH_LEN])?,
                scale: fields::decode_scale(&payload[P2 + HASH_LEN..])?,
            })
        }
        other => Err(DecodeError::UnknownMode(other as char)),
    }
}

// ===== Sizing =====

/// Largest possible encoded message, for sizing fixed-capacity receive
/// buffers. Computed once by encoding a maximal-content instance of every
/// variant and taking the maximum.
pub fn max_encoded_len() -> usize {
    static MAX: OnceLock<usize> = OnceLock::new();
    *MAX.get_or_init(|| {
        let stamp = Some(MessageId(u64::MAX));
        let host = Host::new(
            "W".repeat(NAME_LEN),
            Ipv4Addr::new(255, 255, 255, 255),
            65535,
        );
        let maximal = [
            Message {
                unique_id: stamp,
                required_id: stamp,
                body: Body::Draw(DrawOp::Text {
                    origin: Point::new(9999, 9999),
                    color: Color::new(255, 255, 255),
                    ch: 'W',
                    font: FontSpec::new("W".repeat(20), FontStyle::BoldItalic, true, 99),
                }),
            },
            Message {
                unique_id: stamp,
                required_id: stamp,
                body: Body::Draw(DrawOp::Rectangle {
                    start: Point::new(9999, 9999),
                    end: Point::new(9999, 9999),
                    color: Color::new(255, 255, 255),
                    filled: true,
                    bordered: true,
                    border_color: Color::new(255, 255, 255),
                    border_weight: 99,
                }),
            },
            Message {
                unique_id: stamp,
                required_id: stamp,
                body: Body::Draw(DrawOp::ImageRef {
                    origin: Point::new(9999, 9999),
                    hash: u32::MAX,
                    scale: 99.99,
                }),
            },
            Message::unstamped(Body::Discovery(host.clone())),
            Message {
                unique_id: None,
                required_id: Some(MessageId(u64::MAX)),
                body: Body::PacketRequest(PacketRequest {
                    source_ip: host.ip,
                    source_port: host.port,
                    missing: MessageId(u64::MAX),
                }),
            },
            Message::unstamped(Body::ImageRequest(ImageRequest {
                source_ip: host.ip,
                hash: u32::MAX,
            })),
        ];
        maximal
            .iter()
            .map(|m| {
                let mut out = String::new();
                encode_into(m, &mut out);
                out.len()
            })
            .max()
            .unwrap_or(PAYLOAD_OFFSET)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &Message) -> Message {
        decode(&encode(msg)).expect("decode of freshly encoded message")
    }

    #[test]
    fn test_line_round_trip() {
        // Values from the protocol conformance set.
        let msg = Message {
            unique_id: Some(MessageId::compose(0xA1B2, 1)),
            required_id: None,
            body: Body::Draw(DrawOp::Line {
                start: Point::new(10, 20),
                end: Point::new(300, 400),
                color: Color::new(0xFF, 0x00, 0xFF),
                weight: 3,
            }),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_text_round_trip() {
        let msg = Message {
            unique_id: Some(MessageId::compose(7, 2)),
            required_id: Some(MessageId::compose(7, 1)),
            body: Body::Draw(DrawOp::Text {
                origin: Point::new(100, 200),
                color: Color::BLACK,
                ch: 'A',
                font: FontSpec::new("Serif", FontStyle::Bold, true, 14),
            }),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_polygon_and_freeform_round_trip() {
        for body in [
            Body::Draw(DrawOp::Polygon {
                start: Point::new(1, 2),
                end: Point::new(3, 4),
                color: Color::new(1, 2, 3),
                weight: 1,
            }),
            Body::Draw(DrawOp::Freeform {
                start: Point::new(5, 6),
                end: Point::new(7, 8),
                color: Color::new(9, 8, 7),
                weight: 2,
            }),
        ] {
            let msg = Message {
                unique_id: Some(MessageId::compose(1, 1)),
                required_id: None,
                body,
            };
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_rectangle_round_trip() {
        let msg = Message {
            unique_id: Some(MessageId::compose(3, 9)),
            required_id: Some(MessageId::compose(3, 8)),
            body: Body::Draw(DrawOp::Rectangle {
                start: Point::new(50, 60),
                end: Point::new(150, 160),
                color: Color::new(0x12, 0x34, 0x56),
                filled: true,
                bordered: true,
                border_color: Color::new(0xAB, 0xCD, 0xEF),
                border_weight: 5,
            }),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_image_ref_round_trip() {
        let msg = Message {
            unique_id: Some(MessageId::compose(4, 1)),
            required_id: None,
            body: Body::Draw(DrawOp::ImageRef {
                origin: Point::new(0, 0),
                hash: 0xCAFE_F00D,
                scale: 1.5,
            }),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_host_variants_round_trip() {
        let host = Host::new("board-1", Ipv4Addr::new(192, 168, 1, 22), 55551);
        for body in [
            Body::Discovery(host.clone()),
            Body::DiscoveryReply(host.clone()),
            Body::Join(host.clone()),
            Body::Leave(host.clone()),
        ] {
            let msg = Message::unstamped(body);
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_packet_request_round_trip() {
        let missing = MessageId::compose(0xBEEF, 17);
        let msg = Message {
            unique_id: None,
            required_id: Some(missing),
            body: Body::PacketRequest(PacketRequest {
                source_ip: Ipv4Addr::new(10, 0, 0, 2),
                source_port: 55552,
                missing,
            }),
        };
        let decoded = round_trip(&msg);
        assert_eq!(decoded, msg);
        // The missing id must ride in the required slot even if the caller
        // forgot to mirror it there.
        let sloppy = Message {
            required_id: None,
            ..msg.clone()
        };
        let decoded = decode(&encode(&sloppy)).expect("decode");
        match decoded.body {
            Body::PacketRequest(req) => assert_eq!(req.missing, missing),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_image_request_round_trip() {
        let msg = Message::unstamped(Body::ImageRequest(ImageRequest {
            source_ip: Ipv4Addr::new(172, 16, 0, 9),
            hash: 42,
        }));
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut bytes = encode(&Message::unstamped(Body::Discovery(Host::new(
            "x",
            Ipv4Addr::LOCALHOST,
            55551,
        ))));
        bytes[TAG_OFFSET] = b'z';
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownTag('z')));
    }

    #[test]
    fn test_decode_unknown_mode() {
        let msg = Message {
            unique_id: Some(MessageId::compose(1, 1)),
            required_id: None,
            body: Body::Draw(DrawOp::Line {
                start: Point::new(0, 0),
                end: Point::new(1, 1),
                color: Color::BLACK,
                weight: 1,
            }),
        };
        let mut bytes = encode(&msg);
        bytes[PAYLOAD_OFFSET] = b'Q';
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownMode('Q')));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            decode(b"short"),
            Err(DecodeError::Truncated { got: 5 })
        ));
    }

    #[test]
    fn test_decode_bad_color_digits() {
        let msg = Message {
            unique_id: Some(MessageId::compose(1, 1)),
            required_id: None,
            body: Body::Draw(DrawOp::Line {
                start: Point::new(0, 0),
                end: Point::new(1, 1),
                color: Color::BLACK,
                weight: 1,
            }),
        };
        let mut bytes = encode(&msg);
        // Corrupt the color field (offset: payload + mode + two points).
        let color_at = PAYLOAD_OFFSET + 1 + 16;
        bytes[color_at] = b'z';
        assert_eq!(decode(&bytes), Err(DecodeError::BadField("color")));
    }

    #[test]
    fn test_decode_tolerates_fixed_buffer_padding() {
        let msg = Message::unstamped(Body::Discovery(Host::new(
            "pad",
            Ipv4Addr::LOCALHOST,
            55553,
        )));
        let mut buf = encode(&msg);
        buf.resize(max_encoded_len(), 0);
        assert_eq!(decode(&buf).expect("decode padded"), msg);
    }

    #[test]
    fn test_max_encoded_len_covers_all_variants() {
        let cap = max_encoded_len();
        // Text draw is the widest layout: header + mode + point + color +
        // char + font block.
        assert_eq!(cap, PAYLOAD_OFFSET + 1 + 8 + 6 + 1 + FONT_LEN);

        let host = Host::new("board-1", Ipv4Addr::LOCALHOST, 55551);
        for body in [
            Body::Discovery(host.clone()),
            Body::Join(host),
            Body::ImageRequest(ImageRequest {
                source_ip: Ipv4Addr::LOCALHOST,
                hash: 1,
            }),
        ] {
            assert!(encode(&Message::unstamped(body)).len() <= cap);
        }
    }
}
