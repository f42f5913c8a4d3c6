// ============================================
// File: crates/gatesplice-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec Contract
//!
//! ## Creation Reason
//! The proxy never interprets message payloads itself; it delegates to a
//! codec that knows the versioned protocol tables. This module defines
//! that seam: the `ProtocolCodec` trait, the `DefVersion` selector and the
//! dynamic `Event` value hooks receive.
//!
//! ## Main Functionality
//! - `ProtocolCodec`: trait over name↔opcode maps and parse/write
//! - `DefVersion`: which schema revision a hook wants its events in
//! - `Event`: parsed message payload (a JSON value tree)
//!
//! ## ⚠️ Important Note for Next Developer
//! - `parse` receives the whole frame (header included) and `write`
//!   returns a whole frame; the 4-byte header is the codec's concern
//! - `DefVersion::Raw` never reaches a codec: the dispatcher short-circuits
//!   raw hooks before parsing
//!
//! ## Last Modified
//! v0.1.0 - Initial codec contract

use std::fmt;

use crate::error::Result;

// ============================================
// Event
// ============================================

/// A parsed message payload.
///
/// Schemas are dynamic (loaded from tables at runtime), so events are
/// dynamic too: a JSON value tree whose object keys are the schema's
/// field names.
pub type Event = serde_json::Value;

// ============================================
// DefVersion
// ============================================

/// Which schema revision a hook wants a message interpreted against.
///
/// Independent of the wire protocol version: one connection speaks one
/// protocol version, but each hook may pin an older definition of an
/// individual message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefVersion {
    /// A specific schema revision.
    Exact(u32),
    /// The newest revision the codec knows (`*`).
    Latest,
    /// No parsing at all; the hook sees raw bytes.
    Raw,
}

impl DefVersion {
    /// Interprets a loose string spelling of a definition version.
    ///
    /// `"latest"` and `"*"` select [`DefVersion::Latest`], `"raw"` selects
    /// [`DefVersion::Raw`], a decimal integer selects that revision, and
    /// any other string falls back to [`DefVersion::Latest`].
    #[must_use]
    pub fn parse_lenient(input: &str) -> Self {
        match input {
            "raw" => Self::Raw,
            "latest" | "*" => Self::Latest,
            other => other.parse::<u32>().map_or(Self::Latest, Self::Exact),
        }
    }

    /// Returns `true` for the raw selector.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw)
    }
}

impl fmt::Display for DefVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Latest => write!(f, "*"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

// ============================================
// ProtocolCodec
// ============================================

/// The codec seam between the proxy and the versioned game protocol.
///
/// # Contract
/// - Maps are immutable once loaded; the proxy calls them from the
///   connection task without synchronization
/// - `parse`/`write` operate on whole frames: the input to `parse` starts
///   with the 4-byte `[length][opcode]` header, and `write` produces a
///   frame carrying a correct header
/// - Both may fail; the dispatcher logs codec failures with the message
///   name and a hex dump and keeps the last good buffer
pub trait ProtocolCodec: Send + Sync {
    /// All protocol versions the codec has maps for, ascending.
    fn protocol_versions(&self) -> Vec<u32>;

    /// The earliest protocol version, used to bootstrap in-band version
    /// detection before the real version is known.
    fn earliest_protocol_version(&self) -> Option<u32> {
        self.protocol_versions().first().copied()
    }

    /// Returns `true` if the codec has a map for `version`.
    fn has_protocol_version(&self, version: u32) -> bool {
        self.protocol_versions().contains(&version)
    }

    /// Resolves a canonical message name to its opcode under `version`.
    fn name_to_code(&self, version: u32, name: &str) -> Option<u16>;

    /// Resolves an opcode back to its canonical name under `version`.
    fn code_to_name(&self, version: u32, code: u16) -> Option<String>;

    /// The newest definition revision known for a message name.
    fn latest_definition(&self, name: &str) -> Option<u32>;

    /// The oldest definition revision known for a message name.
    fn earliest_definition(&self, name: &str) -> Option<u32>;

    /// Parses a whole frame into an event.
    ///
    /// # Errors
    /// Unknown version/message, truncated payloads and malformed fields
    /// surface as [`crate::CoreError::Parse`]-family errors.
    fn parse(&self, version: u32, code: u16, definition: DefVersion, data: &[u8])
        -> Result<Event>;

    /// Serializes an event into a whole frame.
    ///
    /// # Errors
    /// Unknown version/message, missing fields and out-of-range values
    /// surface as [`crate::CoreError::Write`]-family errors.
    fn write(&self, version: u32, code: u16, definition: DefVersion, event: &Event)
        -> Result<Vec<u8>>;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_def_version_lenient_parsing() {
        assert_eq!(DefVersion::parse_lenient("raw"), DefVersion::Raw);
        assert_eq!(DefVersion::parse_lenient("latest"), DefVersion::Latest);
        assert_eq!(DefVersion::parse_lenient("*"), DefVersion::Latest);
        assert_eq!(DefVersion::parse_lenient("3"), DefVersion::Exact(3));
        // Any other string falls back to latest.
        assert_eq!(DefVersion::parse_lenient("newest"), DefVersion::Latest);
        assert_eq!(DefVersion::parse_lenient("-1"), DefVersion::Latest);
    }

    #[test]
    fn test_def_version_display() {
        assert_eq!(DefVersion::Exact(2).to_string(), "2");
        assert_eq!(DefVersion::Latest.to_string(), "*");
        assert_eq!(DefVersion::Raw.to_string(), "raw");
    }
}
