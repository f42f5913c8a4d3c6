// ============================================
// File: crates/gatesplice-core/src/lib.rs
// ============================================
//! # Gatesplice Core - Wire Mechanics Library
//!
//! ## Creation Reason
//! Provides the wire-level building blocks of the Gatesplice proxy: frame
//! reassembly, the per-direction stream cipher, and the protocol codec that
//! maps message names to opcodes and payloads to structured events.
//!
//! ## Main Functionality
//!
//! ### Framing Module ([`framing`])
//! - `FrameBuffer`: reassembles a TCP byte stream into length-prefixed frames
//!
//! ### Crypto Module ([`crypto`])
//! - `SessionCipher`: four-key seeded symmetric keystream, one per direction
//! - Keystream seed derivation (HKDF-SHA256)
//!
//! ### Protocol Module ([`protocol`])
//! - `ProtocolCodec` trait: name↔opcode maps and parse/write against
//!   versioned schemas
//! - `TableCodec`: JSON-table-driven codec implementation
//! - Message-name normalization
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              gatesplice-proxy                       │
//! │                    │                                │
//! │                    ▼                                │
//! │             gatesplice-core  ◄── You are here       │
//! │                    │                                │
//! │                    ▼                                │
//! │           gatesplice-common                         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The cipher is a drop-in: the proxy only relies on `init`/`encrypt`/
//!   `decrypt` and the symmetry property documented on `SessionCipher`
//! - Key material MUST stay zeroized on drop
//! - Frame lengths are little-endian and include the 4-byte header
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod framing;
pub mod protocol;

// Re-export commonly used items
pub use crypto::SessionCipher;
pub use error::{CoreError, Result};
pub use framing::FrameBuffer;
pub use protocol::{DefVersion, Event, ProtocolCodec, TableCodec};
