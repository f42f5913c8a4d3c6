// ============================================
// File: crates/gatesplice-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the codec seam between the proxy and the versioned game
//! protocol: name↔opcode maps, schema-driven parse/write, and the
//! message-name normalization rules hooks rely on.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`codec`]: the `ProtocolCodec` trait, `DefVersion` and `Event`
//! - [`tables`]: `TableCodec`, a JSON-table-driven implementation
//! - [`name`]: canonical message-name normalization
//!
//! ## Codec Seam
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Dispatcher                             │
//! │      name→code   code→name   parse(...)   write(...)       │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │  dyn ProtocolCodec
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TableCodec                             │
//! │   maps:     protocolVersion → { name ↔ opcode }             │
//! │   messages: name → { definitionVersion → [FieldDef] }       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Little-endian byte order for multi-byte integers
//! - Every frame carries the 4-byte `[length][opcode]` header
//! - Parse receives and write produces the *whole* frame
//!
//! ## ⚠️ Important Note for Next Developer
//! - The proxy core must only depend on the trait, never on `TableCodec`
//!   specifics; the codec is a drop-in
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol module

pub mod codec;
pub mod name;
pub mod tables;

pub use codec::{DefVersion, Event, ProtocolCodec};
pub use name::normalize_name;
pub use tables::TableCodec;
