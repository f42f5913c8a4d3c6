// ============================================
// File: crates/gatesplice-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to framing, cipher and codec operations
//! in the Gatesplice core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//!
//! ## Error Categories
//! 1. **Framing Errors**: bad length prefixes, oversized frames
//! 2. **Cipher Errors**: key-exchange state violations
//! 3. **Codec Errors**: parse/write failures against versioned schemas
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Codec errors carry the message name so the dispatcher can log the
//!   offending opcode together with a hex dump of the payload
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use gatesplice_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for framing, cipher and codec operations.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Framing Errors
    // ========================================

    /// Length prefix smaller than the 4-byte header.
    #[error("Invalid frame length {length}: below the 4-byte header minimum")]
    FrameTooShort {
        /// The length prefix read from the wire
        length: usize,
    },

    /// Length prefix above the configured ceiling.
    #[error("Frame too large: {length} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// The length prefix read from the wire
        length: usize,
        /// The configured maximum
        limit: usize,
    },

    // ========================================
    // Cipher Errors
    // ========================================

    /// Cipher used in a state its key exchange does not allow.
    #[error("Cipher state violation: {reason}")]
    CipherState {
        /// What was attempted and why it is invalid
        reason: String,
    },

    // ========================================
    // Codec Errors
    // ========================================

    /// Failed to parse a payload against a schema.
    #[error("Parse failed for '{name}' (definition v{definition}): {reason}")]
    Parse {
        /// Message name, or the opcode rendering if unresolved
        name: String,
        /// Definition version used
        definition: String,
        /// What went wrong
        reason: String,
    },

    /// Failed to serialize an event against a schema.
    #[error("Write failed for '{name}' (definition v{definition}): {reason}")]
    Write {
        /// Message name
        name: String,
        /// Definition version used
        definition: String,
        /// What went wrong
        reason: String,
    },

    /// The codec has no table for the requested protocol version.
    #[error("Unknown protocol version {version}")]
    UnknownProtocolVersion {
        /// The requested version
        version: u32,
    },

    /// The codec has no schema for the requested message.
    #[error("Unknown message '{name}'")]
    UnknownMessage {
        /// The requested message name
        name: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `CipherState` error.
    pub fn cipher_state(reason: impl Into<String>) -> Self {
        Self::CipherState {
            reason: reason.into(),
        }
    }

    /// Creates a `Parse` error.
    pub fn parse(
        name: impl Into<String>,
        definition: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parse {
            name: name.into(),
            definition: definition.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `Write` error.
    pub fn write(
        name: impl Into<String>,
        definition: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Write {
            name: name.into(),
            definition: definition.to_string(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a framing error.
    ///
    /// Framing errors are fatal for the connection that produced them.
    #[must_use]
    pub const fn is_framing_error(&self) -> bool {
        matches!(self, Self::FrameTooShort { .. } | Self::FrameTooLarge { .. })
    }

    /// Returns `true` if this is a codec error.
    ///
    /// Codec errors are survivable: the dispatcher logs them and forwards
    /// the original bytes.
    #[must_use]
    pub const fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::Write { .. }
                | Self::UnknownProtocolVersion { .. }
                | Self::UnknownMessage { .. }
        )
    }
}

// ============================================
// Tests
// ============================================
