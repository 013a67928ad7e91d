// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Error taxonomy for sketchwire operations.
//!
//! Decode failures are recoverable by policy: listener loops log them and
//! drop the datagram. Bind failures at startup are definite failures and are
//! returned to the caller. Bulk-transfer timeouts are not errors at all
//! (`transfer::receive_stream` returns `Ok(None)`).

use crate::protocol::codec::DecodeError;

/// Errors returned by sketchwire operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed wire message (short field, bad digits, unknown tag).
    Decode(DecodeError),
    /// Host name or address could not be resolved or parsed.
    Address(String),
    /// Failed to bind a socket (port already in use).
    Bind(String),
    /// Failed to join the discovery multicast group.
    MulticastJoin(String),
    /// A datagram send failed.
    Send(String),
    /// Bulk-transfer accept or read deadline expired.
    Timeout,
    /// Operation is invalid in the current connection state.
    InvalidState(String),
    /// I/O error with underlying cause.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Decode(e) => write!(f, "Decode failed: {}", e),
            Error::Address(msg) => write!(f, "Bad address: {}", msg),
            Error::Bind(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoin(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::Send(msg) => write!(f, "Send failed: {}", msg),
            Error::Timeout => write!(f, "Timed out"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
