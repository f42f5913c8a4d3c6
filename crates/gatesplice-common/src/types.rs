// ============================================
// File: crates/gatesplice-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes fundamental type definitions used throughout the Gatesplice
//! proxy, ensuring type safety and consistent representations.
//!
//! ## Main Functionality
//! - `Opcode`: 16-bit in-band message type identifier
//! - `Direction`: which peer a relayed message is travelling toward
//! - Type conversions and display implementations
//!
//! ## Main Logical Flow
//! 1. Opcodes are read from the wire at offset 2 of every frame
//! 2. Used as keys in the hook registry and codec maps
//! 3. Directions select which cipher and socket a message uses
//!
//! ## ⚠️ Important Note for Next Developer
//! - Opcodes are little-endian on the wire; `Opcode` stores the host value
//! - `Direction::ToClient` corresponds to `incoming = true` in dispatch
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================
// Opcode
// ============================================

/// 16-bit message type identifier transmitted in-band.
///
/// # Wire Format
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ length (u16) │ opcode (u16) │ payload (...)   │
/// │ little-endian│ little-endian│                 │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
///
/// # Example
/// ```
/// use gatesplice_common::Opcode;
///
/// let op = Opcode::from_frame(&[0x08, 0x00, 0x12, 0x34]).unwrap();
/// assert_eq!(op.value(), 0x3412);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(u16);

impl Opcode {
    /// Byte offset of the opcode within a frame.
    pub const OFFSET: usize = 2;

    /// Creates an `Opcode` from a raw value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Reads the opcode from a framed message.
    ///
    /// # Returns
    /// `None` if the frame is shorter than the 4-byte header.
    #[must_use]
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        if frame.len() < Self::OFFSET + 2 {
            return None;
        }
        Some(Self(u16::from_le_bytes([
            frame[Self::OFFSET],
            frame[Self::OFFSET + 1],
        ])))
    }

    /// Returns the raw opcode value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Returns the opcode as little-endian wire bytes.
    #[must_use]
    pub const fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for Opcode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> Self {
        op.0
    }
}

// ============================================
// Direction
// ============================================

/// The peer a relayed or synthesized message is travelling toward.
///
/// # Purpose
/// Selects the cipher and socket used when a message leaves the proxy,
/// and determines the `incoming` flag seen by hooks (`ToClient` traffic
/// is what the client would have received from the server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Proxy → game client (server-originated traffic).
    ToClient,
    /// Proxy → game server (client-originated traffic).
    ToServer,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::ToClient => Self::ToServer,
            Self::ToServer => Self::ToClient,
        }
    }

    /// Whether a message travelling this way is "incoming" from the
    /// client's point of view.
    #[must_use]
    pub const fn is_incoming(self) -> bool {
        matches!(self, Self::ToClient)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToClient => write!(f, "to-client"),
            Self::ToServer => write!(f, "to-server"),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_frame() {
        // [len=8][opcode=0x3412][payload]
        let frame = [0x08, 0x00, 0x12, 0x34, 0xaa, 0xbb, 0xcc, 0xdd];
        let op = Opcode::from_frame(&frame).unwrap();
        assert_eq!(op.value(), 0x3412);
        assert_eq!(op.to_le_bytes(), [0x12, 0x34]);
    }

    #[test]
    fn test_opcode_from_short_frame() {
        assert!(Opcode::from_frame(&[0x08, 0x00, 0x12]).is_none());
        assert!(Opcode::from_frame(&[]).is_none());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::new(0x3412).to_string(), "0x3412");
        assert_eq!(Opcode::new(7).to_string(), "0x0007");
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::ToClient.reverse(), Direction::ToServer);
        assert_eq!(Direction::ToServer.reverse(), Direction::ToClient);
    }

    #[test]
    fn test_direction_incoming() {
        assert!(Direction::ToClient.is_incoming());
        assert!(!Direction::ToServer.is_incoming());
    }

    #[test]
    fn test_opcode_json_roundtrip() {
        let op = Opcode::new(19900);
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, "19900");
        let back: Opcode = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
