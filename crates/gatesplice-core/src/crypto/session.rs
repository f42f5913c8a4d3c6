// ============================================
// File: crates/gatesplice-core/src/crypto/session.rs
// ============================================
//! # Session Cipher
//!
//! ## Creation Reason
//! Wraps the keystream primitive in the key-exchange shape the game
//! protocol uses: two 128-byte client keys and two 128-byte server keys,
//! exchanged in the clear during the handshake, seed one cipher per
//! connection leg.
//!
//! ## Main Functionality
//! - Key slot management (`set_client_key` / `set_server_key`)
//! - `init()`: HKDF-SHA256 seed derivation once all four slots are set
//! - In-place `encrypt` / `decrypt` with independent stream positions
//!
//! ## Key Derivation
//! ```text
//! seed = HKDF-SHA256(
//!     salt = "gatesplice/key-exchange/v1",
//!     ikm  = clientKeys[0] || clientKeys[1] || serverKeys[0] || serverKeys[1],
//!     info = "gatesplice/keystream",
//! )
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The encrypt and decrypt streams share a seed but advance separately;
//!   each tracks one flow of one connection leg
//! - `init()` is single-shot: calling it twice is a state violation
//!
//! ## Last Modified
//! v0.1.0 - Initial session cipher

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::keystream::Keystream;
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of each exchanged key, in bytes.
pub const EXCHANGE_KEY_SIZE: usize = 128;

/// HKDF salt, domain-separating this construction.
const HKDF_SALT: &[u8] = b"gatesplice/key-exchange/v1";

/// HKDF info string for the keystream seed.
const HKDF_INFO: &[u8] = b"gatesplice/keystream";

// ============================================
// SessionCipher
// ============================================

/// Per-leg symmetric cipher seeded by the game's four-key exchange.
///
/// # Symmetry
/// Two ciphers initialized from the same four keys invert each other:
/// bytes pushed through one side's `encrypt` come out of the other side's
/// `decrypt` unchanged, provided each stream sees the same byte counts.
///
/// # Example
/// ```
/// use gatesplice_core::SessionCipher;
///
/// let mut endpoint = SessionCipher::new();
/// let mut proxy = SessionCipher::new();
/// for cipher in [&mut endpoint, &mut proxy] {
///     cipher.set_client_key(0, &[1u8; 128]).unwrap();
///     cipher.set_client_key(1, &[2u8; 128]).unwrap();
///     cipher.set_server_key(0, &[3u8; 128]).unwrap();
///     cipher.set_server_key(1, &[4u8; 128]).unwrap();
///     cipher.init().unwrap();
/// }
///
/// let mut data = b"hello".to_vec();
/// endpoint.encrypt(&mut data).unwrap();
/// proxy.decrypt(&mut data).unwrap();
/// assert_eq!(data, b"hello");
/// ```
pub struct SessionCipher {
    client_keys: [Option<Box<[u8; EXCHANGE_KEY_SIZE]>>; 2],
    server_keys: [Option<Box<[u8; EXCHANGE_KEY_SIZE]>>; 2],
    streams: Option<Streams>,
}

struct Streams {
    encrypt: Keystream,
    decrypt: Keystream,
}

impl SessionCipher {
    /// Creates a cipher with empty key slots.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            client_keys: [None, None],
            server_keys: [None, None],
            streams: None,
        }
    }

    /// Stores a client key into slot 0 or 1.
    ///
    /// # Errors
    /// Rejects slots other than 0/1 and keys that are not exactly 128 bytes.
    pub fn set_client_key(&mut self, slot: usize, key: &[u8]) -> Result<()> {
        let boxed = Self::check_key(slot, key)?;
        self.client_keys[slot] = Some(boxed);
        Ok(())
    }

    /// Stores a server key into slot 0 or 1.
    ///
    /// # Errors
    /// Rejects slots other than 0/1 and keys that are not exactly 128 bytes.
    pub fn set_server_key(&mut self, slot: usize, key: &[u8]) -> Result<()> {
        let boxed = Self::check_key(slot, key)?;
        self.server_keys[slot] = Some(boxed);
        Ok(())
    }

    fn check_key(slot: usize, key: &[u8]) -> Result<Box<[u8; EXCHANGE_KEY_SIZE]>> {
        if slot > 1 {
            return Err(CoreError::cipher_state(format!(
                "key slot {slot} out of range"
            )));
        }
        if key.len() != EXCHANGE_KEY_SIZE {
            return Err(CoreError::cipher_state(format!(
                "exchange key must be {EXCHANGE_KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let mut boxed = Box::new([0u8; EXCHANGE_KEY_SIZE]);
        boxed.copy_from_slice(key);
        Ok(boxed)
    }

    /// Returns `true` once all four key slots are populated.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        self.client_keys.iter().all(Option::is_some)
            && self.server_keys.iter().all(Option::is_some)
    }

    /// Returns `true` once `init` has run.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.streams.is_some()
    }

    /// Derives the keystream seed and arms both directions.
    ///
    /// # Errors
    /// `CipherState` if any key slot is empty or `init` already ran. The
    /// handshake driver treats this as fatal for the connection.
    pub fn init(&mut self) -> Result<()> {
        if self.streams.is_some() {
            return Err(CoreError::cipher_state("cipher already initialized"));
        }
        if !self.is_keyed() {
            return Err(CoreError::cipher_state(
                "init before all four exchange keys were set",
            ));
        }

        let mut ikm = [0u8; EXCHANGE_KEY_SIZE * 4];
        for (i, key) in self
            .client_keys
            .iter()
            .chain(self.server_keys.iter())
            .enumerate()
        {
            let key = key.as_ref().expect("checked by is_keyed");
            ikm[i * EXCHANGE_KEY_SIZE..(i + 1) * EXCHANGE_KEY_SIZE].copy_from_slice(&key[..]);
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &ikm);
        let mut seed = [0u8; 32];
        hk.expand(HKDF_INFO, &mut seed)
            .map_err(|_| CoreError::cipher_state("HKDF expand failed"))?;
        ikm.zeroize();

        self.streams = Some(Streams {
            encrypt: Keystream::new(seed),
            decrypt: Keystream::new(seed),
        });
        seed.zeroize();

        Ok(())
    }

    /// Encrypts the buffer in place.
    ///
    /// # Errors
    /// `CipherState` if the cipher was not initialized.
    pub fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        let streams = self
            .streams
            .as_mut()
            .ok_or_else(|| CoreError::cipher_state("encrypt before init"))?;
        streams.encrypt.apply(buf);
        Ok(())
    }

    /// Decrypts the buffer in place.
    ///
    /// # Errors
    /// `CipherState` if the cipher was not initialized.
    pub fn decrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        let streams = self
            .streams
            .as_mut()
            .ok_or_else(|| CoreError::cipher_state("decrypt before init"))?;
        streams.decrypt.apply(buf);
        Ok(())
    }
}

impl Default for SessionCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionCipher {
    fn drop(&mut self) {
        for key in self.client_keys.iter_mut().chain(self.server_keys.iter_mut()) {
            if let Some(key) = key.as_mut() {
                key.zeroize();
            }
        }
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material intentionally omitted
        f.debug_struct("SessionCipher")
            .field("keyed", &self.is_keyed())
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_cipher() -> SessionCipher {
        let mut cipher = SessionCipher::new();
        cipher.set_client_key(0, &[1u8; EXCHANGE_KEY_SIZE]).unwrap();
        cipher.set_client_key(1, &[2u8; EXCHANGE_KEY_SIZE]).unwrap();
        cipher.set_server_key(0, &[3u8; EXCHANGE_KEY_SIZE]).unwrap();
        cipher.set_server_key(1, &[4u8; EXCHANGE_KEY_SIZE]).unwrap();
        cipher
    }

    #[test]
    fn test_encrypt_then_decrypt_same_cipher() {
        // The two directions start aligned, so a fresh cipher inverts
        // itself on identical input.
        let mut cipher = keyed_cipher();
        cipher.init().unwrap();

        let original = b"attack at dawn".to_vec();
        let mut data = original.clone();

        cipher.encrypt(&mut data).unwrap();
        assert_ne!(data, original);

        cipher.decrypt(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_peer_ciphers_invert() {
        let mut a = keyed_cipher();
        let mut b = keyed_cipher();
        a.init().unwrap();
        b.init().unwrap();

        let original: Vec<u8> = (0u8..=255).collect();
        let mut data = original.clone();

        a.encrypt(&mut data).unwrap();
        b.decrypt(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_streams_advance_independently() {
        let mut a = keyed_cipher();
        let mut b = keyed_cipher();
        a.init().unwrap();
        b.init().unwrap();

        // Interleave directions: a encrypts two frames while b decrypts
        // them, with b also encrypting its own traffic in between.
        let frame1 = b"first".to_vec();
        let frame2 = b"second frame".to_vec();

        let mut wire1 = frame1.clone();
        a.encrypt(&mut wire1).unwrap();

        let mut unrelated = b"reverse traffic".to_vec();
        b.encrypt(&mut unrelated).unwrap();

        let mut wire2 = frame2.clone();
        a.encrypt(&mut wire2).unwrap();

        b.decrypt(&mut wire1).unwrap();
        b.decrypt(&mut wire2).unwrap();
        assert_eq!(wire1, frame1);
        assert_eq!(wire2, frame2);
    }

    #[test]
    fn test_init_before_keys_fails() {
        let mut cipher = SessionCipher::new();
        assert!(matches!(
            cipher.init(),
            Err(CoreError::CipherState { .. })
        ));

        cipher.set_client_key(0, &[0u8; EXCHANGE_KEY_SIZE]).unwrap();
        assert!(cipher.init().is_err());
        assert!(!cipher.is_ready());
    }

    #[test]
    fn test_double_init_fails() {
        let mut cipher = keyed_cipher();
        cipher.init().unwrap();
        assert!(matches!(
            cipher.init(),
            Err(CoreError::CipherState { .. })
        ));
    }

    #[test]
    fn test_use_before_init_fails() {
        let mut cipher = keyed_cipher();
        let mut data = vec![0u8; 8];
        assert!(cipher.encrypt(&mut data).is_err());
        assert!(cipher.decrypt(&mut data).is_err());
    }

    #[test]
    fn test_key_length_enforced() {
        let mut cipher = SessionCipher::new();
        assert!(cipher.set_client_key(0, &[0u8; 64]).is_err());
        assert!(cipher.set_server_key(2, &[0u8; EXCHANGE_KEY_SIZE]).is_err());
    }

    #[test]
    fn test_different_keys_different_streams() {
        let mut a = keyed_cipher();
        a.init().unwrap();

        let mut b = SessionCipher::new();
        b.set_client_key(0, &[9u8; EXCHANGE_KEY_SIZE]).unwrap();
        b.set_client_key(1, &[2u8; EXCHANGE_KEY_SIZE]).unwrap();
        b.set_server_key(0, &[3u8; EXCHANGE_KEY_SIZE]).unwrap();
        b.set_server_key(1, &[4u8; EXCHANGE_KEY_SIZE]).unwrap();
        b.init().unwrap();

        let mut x = vec![0u8; 32];
        let mut y = vec![0u8; 32];
        a.encrypt(&mut x).unwrap();
        b.encrypt(&mut y).unwrap();
        assert_ne!(x, y);
    }
}
