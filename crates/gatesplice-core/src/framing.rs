// ============================================
// File: crates/gatesplice-core/src/framing.rs
// ============================================
//! # Frame Reassembly
//!
//! ## Creation Reason
//! TCP delivers a byte stream with arbitrary segmentation; the game protocol
//! is a sequence of length-prefixed messages. `FrameBuffer` accumulates
//! decrypted bytes and yields exactly the framed messages, however the
//! stream was chopped in transit.
//!
//! ## Main Functionality
//! - `FrameBuffer::push`: append a decrypted chunk
//! - `FrameBuffer::next_frame`: detach the next complete message, if any
//!
//! ## Wire Format
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┐
//! │ length (u16) │ opcode (u16) │ payload (...)   │
//! └──────────────┴──────────────┴─────────────────┘
//! ```
//! The length is little-endian and covers the whole frame including the
//! 4-byte header, so the minimum legal value is 4.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A length prefix below 4 or above the ceiling is a fatal framing error
//!   for the connection; there is no way to resynchronize the stream
//! - Frames are never fragmented or coalesced on the way out
//!
//! ## Last Modified
//! v0.1.0 - Initial frame buffer

use bytes::{Buf, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the frame header (length + opcode).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default ceiling on a single frame. The length field is 16 bits, so
/// nothing larger can be expressed on the wire anyway.
pub const DEFAULT_MAX_FRAME_LEN: usize = u16::MAX as usize;

// ============================================
// FrameBuffer
// ============================================

/// Reassembles a decrypted TCP byte stream into discrete messages.
///
/// # Example
/// ```
/// use gatesplice_core::FrameBuffer;
///
/// let mut buf = FrameBuffer::new();
/// buf.push(&[0x08, 0x00, 0x12]);            // partial frame
/// assert!(buf.next_frame().unwrap().is_none());
/// buf.push(&[0x34, 0xaa, 0xbb, 0xcc, 0xdd]); // rest arrives
/// let frame = buf.next_frame().unwrap().unwrap();
/// assert_eq!(frame.len(), 8);
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl FrameBuffer {
    /// Creates a frame buffer with the default frame ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a frame buffer with an explicit frame ceiling.
    #[must_use]
    pub fn with_limit(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_len,
        }
    }

    /// Appends a chunk of decrypted bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Detaches the next complete frame, if one is buffered.
    ///
    /// # Returns
    /// - `Ok(Some(frame))` - a complete frame, exactly `length` bytes
    /// - `Ok(None)` - not enough bytes buffered yet
    ///
    /// # Errors
    /// A length prefix below [`FRAME_HEADER_SIZE`] or above the ceiling is
    /// unrecoverable; the caller must terminate the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let length = usize::from(u16::from_le_bytes([self.buffer[0], self.buffer[1]]));

        if length < FRAME_HEADER_SIZE {
            return Err(CoreError::FrameTooShort { length });
        }
        if length > self.max_frame_len {
            return Err(CoreError::FrameTooLarge {
                length,
                limit: self.max_frame_len,
            });
        }

        if self.buffer.len() < length {
            return Ok(None);
        }

        let frame = self.buffer.copy_to_bytes(length);
        Ok(Some(frame.to_vec()))
    }

    /// Number of bytes currently buffered (complete or not).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Tests
// ============================================
