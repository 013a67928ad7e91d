// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Fixed-width field encoders and decoders shared by every message variant.
//!
//! The wire format is offset-addressed ASCII: IPs are three digits per octet
//! (12 chars), ports 5-digit decimal, points two 4-digit decimals, colors
//! 6 hex digits, booleans a single `t`/`f`. Decoders validate width and
//! parseability and report [`DecodeError`] instead of panicking.

use std::net::Ipv4Addr;

use super::codec::DecodeError;
use super::{Color, FontSpec, FontStyle, MessageId, Point, ID_FILL, ID_WIDTH};

pub const IP_LEN: usize = 12;
pub const PORT_LEN: usize = 5;
pub const NAME_LEN: usize = 16;
pub const POINT_LEN: usize = 8;
pub const COLOR_LEN: usize = 6;
pub const WEIGHT_LEN: usize = 2;
pub const FONT_NAME_LEN: usize = 20;
pub const FONT_LEN: usize = FONT_NAME_LEN + 1 + 1 + 2;
pub const HASH_LEN: usize = 10;
pub const SCALE_LEN: usize = 5;

/// Parse a fixed run of ASCII decimal digits.
fn digits(s: &str, field: &'static str) -> Result<u64, DecodeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::BadField(field));
    }
    s.parse::<u64>().map_err(|_| DecodeError::BadField(field))
}

// ===== Id slots =====

pub fn encode_id_slot(id: Option<MessageId>, out: &mut String) {
    match id {
        Some(id) => out.push_str(&id.to_string()),
        None => {
            for _ in 0..ID_WIDTH {
                out.push(ID_FILL as char);
            }
        }
    }
}

pub fn decode_id_slot(s: &str) -> Result<Option<MessageId>, DecodeError> {
    if s.len() != ID_WIDTH {
        return Err(DecodeError::BadField("id"));
    }
    if s.bytes().all(|b| b == ID_FILL) {
        return Ok(None);
    }
    let raw = u64::from_str_radix(s, 16).map_err(|_| DecodeError::BadField("id"))?;
    Ok(Some(MessageId(raw)))
}

// ===== Addresses =====

pub fn encode_ip(ip: Ipv4Addr, out: &mut String) {
    for octet in ip.octets() {
        out.push_str(&format!("{:03}", octet));
    }
}

pub fn decode_ip(s: &str) -> Result<Ipv4Addr, DecodeError> {
    if s.len() != IP_LEN {
        return Err(DecodeError::BadField("ip"));
    }
    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        let part = digits(&s[i * 3..i * 3 + 3], "ip")?;
        *octet = u8::try_from(part).map_err(|_| DecodeError::BadField("ip"))?;
    }
    Ok(Ipv4Addr::from(octets))
}

pub fn encode_port(port: u16, out: &mut String) {
    out.push_str(&format!("{:05}", port));
}

pub fn decode_port(s: &str) -> Result<u16, DecodeError> {
    if s.len() != PORT_LEN {
        return Err(DecodeError::BadField("port"));
    }
    let port = digits(s, "port")?;
    // Port 0 is never a valid peer endpoint.
    if port == 0 || port > u64::from(u16::MAX) {
        return Err(DecodeError::BadField("port"));
    }
    Ok(port as u16)
}

/// Space-padded display name block. Non-ASCII characters are dropped and
/// the name is truncated to the block width.
pub fn encode_name(name: &str, out: &mut String) {
    let mut written = 0;
    for ch in name.chars() {
        if written == NAME_LEN {
            break;
        }
        if ch.is_ascii() && !ch.is_ascii_control() {
            out.push(ch);
            written += 1;
        }
    }
    for _ in written..NAME_LEN {
        out.push(' ');
    }
}

pub fn decode_name(s: &str) -> Result<String, DecodeError> {
    if s.len() != NAME_LEN {
        return Err(DecodeError::BadField("name"));
    }
    Ok(s.trim_end().to_string())
}

// ===== Geometry =====

pub fn encode_point(p: Point, out: &mut String) {
    out.push_str(&format!("{:04}{:04}", p.x.min(9999), p.y.min(9999)));
}

pub fn decode_point(s: &str) -> Result<Point, DecodeError> {
    if s.len() != POINT_LEN {
        return Err(DecodeError::BadField("point"));
    }
    let x = digits(&s[..4], "point")?;
    let y = digits(&s[4..], "point")?;
    Ok(Point::new(x as u16, y as u16))
}

pub fn encode_color(c: Color, out: &mut String) {
    out.push_str(&format!("{:02x}{:02x}{:02x}", c.r, c.g, c.b));
}

pub fn decode_color(s: &str) -> Result<Color, DecodeError> {
    if s.len() != COLOR_LEN {
        return Err(DecodeError::BadField("color"));
    }
    let parse = |part: &str| {
        u8::from_str_radix(part, 16).map_err(|_| DecodeError::BadField("color"))
    };
    Ok(Color::new(parse(&s[0..2])?, parse(&s[2..4])?, parse(&s[4..6])?))
}

pub fn encode_weight(w: u8, out: &mut String) {
    out.push_str(&format!("{:02}", w.min(99)));
}

pub fn decode_weight(s: &str) -> Result<u8, DecodeError> {
    if s.len() != WEIGHT_LEN {
        return Err(DecodeError::BadField("weight"));
    }
    Ok(digits(s, "weight")? as u8)
}

// ===== Flags =====

pub fn encode_bool(v: bool, out: &mut String) {
    out.push(if v { 't' } else { 'f' });
}

pub fn decode_bool(s: &str) -> Result<bool, DecodeError> {
    match s {
        "t" => Ok(true),
        "f" => Ok(false),
        _ => Err(DecodeError::BadField("flag")),
    }
}

// ===== Fonts =====

pub fn encode_font(font: &FontSpec, out: &mut String) {
    let mut written = 0;
    for ch in font.name.chars() {
        if written == FONT_NAME_LEN {
            break;
        }
        if ch.is_ascii() && !ch.is_ascii_control() {
            out.push(ch);
            written += 1;
        }
    }
    for _ in written..FONT_NAME_LEN {
        out.push(' ');
    }
    out.push_str(&format!("{}", font.style.as_digit()));
    encode_bool(font.underline, out);
    out.push_str(&format!("{:02}", font.size.min(99)));
}

pub fn decode_font(s: &str) -> Result<FontSpec, DecodeError> {
    if s.len() != FONT_LEN {
        return Err(DecodeError::BadField("font"));
    }
    let name = s[..FONT_NAME_LEN].trim_end().to_string();
    let style_digit = digits(&s[FONT_NAME_LEN..FONT_NAME_LEN + 1], "font")?;
    let style =
        FontStyle::from_digit(style_digit as u8).ok_or(DecodeError::BadField("font"))?;
    let underline = decode_bool(&s[FONT_NAME_LEN + 1..FONT_NAME_LEN + 2])?;
    let size = digits(&s[FONT_NAME_LEN + 2..], "font")? as u8;
    Ok(FontSpec {
        name,
        style,
        underline,
        size,
    })
}

// ===== Image fields =====

pub fn encode_hash(hash: u32, out: &mut String) {
    out.push_str(&format!("{:010}", hash));
}

pub fn decode_hash(s: &str) -> Result<u32, DecodeError> {
    if s.len() != HASH_LEN {
        return Err(DecodeError::BadField("hash"));
    }
    let raw = digits(s, "hash")?;
    u32::try_from(raw).map_err(|_| DecodeError::BadField("hash"))
}

/// Scale factor as a 5-char fixed-point field, e.g. `01.50`.
pub fn encode_scale(scale: f32, out: &mut String) {
    out.push_str(&format!("{:05.2}", scale.clamp(0.0, 99.99)));
}

pub fn decode_scale(s: &str) -> Result<f32, DecodeError> {
    if s.len() != SCALE_LEN || s.as_bytes()[2] != b'.' {
        return Err(DecodeError::BadField("scale"));
    }
    s.parse::<f32>().map_err(|_| DecodeError::BadField("scale"))
}
