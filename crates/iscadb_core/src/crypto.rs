//! Field-level crypto primitives.
//!
//! AES-128-CTR with a fixed key and an all-zero IV. CTR is a stream
//! mode: output length always equals input length, which is what lets
//! the transform run in place over a fixed-width record slot.
//!
//! ## Security Model
//!
//! This is obfuscation, not confidentiality: the key is a configured
//! constant, the IV never rotates, and there is no authentication tag.
//! The byte-for-byte behavior is kept for compatibility with existing
//! table files.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// The default configured key.
pub const DEFAULT_KEY: [u8; KEY_LEN] = *b"0123456789abcdef";

/// Length-preserving cipher over record slots.
#[derive(Clone)]
pub struct RecordCipher {
    key: [u8; KEY_LEN],
}

impl RecordCipher {
    /// Creates a cipher with the given key.
    #[must_use]
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Encrypts `input`, producing exactly `input.len()` bytes.
    #[must_use]
    pub fn encrypt(&self, input: &[u8]) -> Vec<u8> {
        self.apply(input)
    }

    /// Decrypts `input`, producing exactly `input.len()` bytes.
    #[must_use]
    pub fn decrypt(&self, input: &[u8]) -> Vec<u8> {
        // CTR decryption is the same keystream XOR as encryption.
        self.apply(input)
    }

    fn apply(&self, input: &[u8]) -> Vec<u8> {
        let iv = [0u8; 16];
        let mut cipher = Aes128Ctr::new(&self.key.into(), &iv.into());
        let mut output = input.to_vec();
        cipher.apply_keystream(&mut output);
        output
    }
}

impl Default for RecordCipher {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = RecordCipher::default();
        let plain = b"the quick brown fox";
        let encrypted = cipher.encrypt(plain);
        assert_ne!(&encrypted, plain);
        assert_eq!(cipher.decrypt(&encrypted), plain);
    }

    #[test]
    fn length_preserved() {
        let cipher = RecordCipher::default();
        for len in [0usize, 1, 15, 16, 17, 128] {
            let input = vec![0xA5; len];
            assert_eq!(cipher.encrypt(&input).len(), len);
        }
    }

    #[test]
    fn deterministic_for_fixed_key_and_iv() {
        let cipher = RecordCipher::default();
        let input = b"same bytes in, same bytes out";
        assert_eq!(cipher.encrypt(input), cipher.encrypt(input));
    }

    #[test]
    fn different_keys_differ() {
        let a = RecordCipher::new(*b"0123456789abcdef");
        let b = RecordCipher::new(*b"fedcba9876543210");
        let input = b"payload";
        assert_ne!(a.encrypt(input), b.encrypt(input));
    }
}
