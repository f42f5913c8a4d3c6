// ============================================
// File: crates/gatesplice-core/src/crypto/keystream.rs
// ============================================
//! # Counter Keystream
//!
//! ## Creation Reason
//! Provides the raw keystream primitive behind `SessionCipher`: a
//! deterministic byte stream derived from a 32-byte seed, applied to
//! buffers by XOR.
//!
//! ## Block Construction
//! ```text
//! block[n] = SHA-256(seed || n as u64 LE)      (32 bytes per block)
//! ```
//! The stream position advances by the number of bytes applied, so two
//! streams with the same seed that process the same byte counts stay in
//! lockstep.
//!
//! ## ⚠️ Important Note for Next Developer
//! - XOR is its own inverse; `apply` both encrypts and decrypts
//! - Never reuse one `Keystream` for two independent data flows
//!
//! ## Last Modified
//! v0.1.0 - Initial keystream implementation

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

// ============================================
// Constants
// ============================================

/// Size of one keystream block (SHA-256 output).
const BLOCK_SIZE: usize = 32;

// ============================================
// Keystream
// ============================================

/// A positioned keystream over a 32-byte seed.
pub struct Keystream {
    seed: [u8; 32],
    position: u64,
}

impl Keystream {
    /// Creates a keystream at position zero.
    #[must_use]
    pub const fn new(seed: [u8; 32]) -> Self {
        Self { seed, position: 0 }
    }

    /// Current stream position in bytes.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// XORs the buffer against the keystream in place and advances the
    /// position by `buf.len()`.
    pub fn apply(&mut self, buf: &mut [u8]) {
        let mut block = [0u8; BLOCK_SIZE];
        let mut block_index = u64::MAX; // force generation on first byte

        for byte in buf.iter_mut() {
            let index = self.position / BLOCK_SIZE as u64;
            if index != block_index {
                block = self.block(index);
                block_index = index;
            }
            *byte ^= block[(self.position % BLOCK_SIZE as u64) as usize];
            self.position += 1;
        }

        block.zeroize();
    }

    /// Generates keystream block `n`.
    fn block(&self, n: u64) -> [u8; BLOCK_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(n.to_le_bytes());
        hasher.finalize().into()
    }
}

impl Drop for Keystream {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seed intentionally omitted
        f.debug_struct("Keystream")
            .field("position", &self.position)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_involution() {
        let mut a = Keystream::new([0x42; 32]);
        let mut b = Keystream::new([0x42; 32]);

        let original = b"the quick brown fox".to_vec();
        let mut data = original.clone();

        a.apply(&mut data);
        assert_ne!(data, original);

        b.apply(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_position_tracks_bytes() {
        let mut ks = Keystream::new([1; 32]);
        assert_eq!(ks.position(), 0);

        let mut buf = [0u8; 100];
        ks.apply(&mut buf);
        assert_eq!(ks.position(), 100);

        ks.apply(&mut buf[..7]);
        assert_eq!(ks.position(), 107);
    }

    #[test]
    fn test_chunked_equals_whole() {
        // Applying the stream in pieces must match a single application.
        let mut whole = Keystream::new([7; 32]);
        let mut chunked = Keystream::new([7; 32]);

        let mut data_whole = vec![0xA5u8; 200];
        let mut data_chunked = data_whole.clone();

        whole.apply(&mut data_whole);

        for chunk in data_chunked.chunks_mut(13) {
            chunked.apply(chunk);
        }

        assert_eq!(data_whole, data_chunked);
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = Keystream::new([1; 32]);
        let mut b = Keystream::new([2; 32]);

        let mut x = vec![0u8; 64];
        let mut y = vec![0u8; 64];
        a.apply(&mut x);
        b.apply(&mut y);

        assert_ne!(x, y);
    }

    #[test]
    fn test_empty_buffer() {
        let mut ks = Keystream::new([9; 32]);
        let mut empty: [u8; 0] = [];
        ks.apply(&mut empty);
        assert_eq!(ks.position(), 0);
    }
}
