// ============================================
// File: crates/gatesplice-core/src/crypto/mod.rs
// ============================================
//! # Crypto Module
//!
//! ## Creation Reason
//! Implements the per-direction symmetric keystream cipher the proxy pairs
//! with each leg of a connection, seeded by the game's 4×128-byte key
//! exchange.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keystream`]: SHA-256 counter keystream applied by XOR
//! - [`session`]: `SessionCipher` with key slots and paired directions
//!
//! ## Cipher Model
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     SessionCipher                         │
//! │                                                           │
//! │  clientKeys[0] ─┐                                         │
//! │  clientKeys[1] ─┤                                         │
//! │  serverKeys[0] ─┼─► HKDF-SHA256 ─► 32-byte seed           │
//! │  serverKeys[1] ─┘                      │                  │
//! │                         ┌──────────────┴───────────────┐  │
//! │                         ▼                              ▼  │
//! │                 encrypt keystream              decrypt keystream
//! │                 (own position)                 (own position)
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//! The keystream is symmetric: two ciphers initialized from the same four
//! keys whose positions track each other invert one another exactly. The
//! proxy relies on this to splice itself into the middle of an existing
//! encrypted session.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `init()` before all four keys are set is a programming error in the
//!   handshake driver; it surfaces as `CoreError::CipherState`
//! - Key material and seeds are zeroized on drop
//!
//! ## Last Modified
//! v0.1.0 - Initial cipher implementation

pub mod keystream;
pub mod session;

pub use keystream::Keystream;
pub use session::{SessionCipher, EXCHANGE_KEY_SIZE};
