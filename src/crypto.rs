//! Handshake token encryption.
//!
//! The handshake line is the only thing the agent ever sends in a structured
//! form; everything after it is an opaque byte stream. When a pre-shared key
//! is configured the token is sealed with ChaCha20-Poly1305 so the relay can
//! detect tampering. Every seal draws a fresh random nonce from the OS
//! CSPRNG (nonce reuse under one key would break both confidentiality and
//! integrity) and prepends it to the ciphertext, so the blob is
//! self-contained. The whole blob is base64-encoded to keep it newline-free
//! for the line-delimited handshake.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of the pre-shared handshake key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the AEAD nonce in bytes (96 bits for ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Pre-shared symmetric key for sealing handshake tokens.
///
/// Automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeKey([u8; KEY_SIZE]);

impl HandshakeKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a key from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Decode a key from its base64 transport encoding.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = BASE64.decode(encoded.trim()).map_err(Error::KeyDecode)?;
        Self::from_slice(&raw)
    }
}

impl std::fmt::Debug for HandshakeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HandshakeKey(..)")
    }
}

/// Seal a handshake token into a transport-safe blob.
///
/// Output is `base64(nonce || ciphertext || tag)`. A fresh random nonce is
/// drawn per call, so sealing the same token twice never produces the same
/// blob.
pub fn seal_token(token: &str, key: &HandshakeKey) -> Result<String> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), token.as_bytes())
        .map_err(|_| Error::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Open a blob produced by [`seal_token`].
///
/// This is what the relay side runs; the agent itself only seals. Fails on
/// truncated input, tampered ciphertext, or a mismatched key.
pub fn open_token(blob: &str, key: &HandshakeKey) -> Result<String> {
    let raw = BASE64.decode(blob.trim()).map_err(|_| Error::Decrypt)?;
    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decrypt);
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| Error::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn test_key() -> HandshakeKey {
        HandshakeKey::from_bytes([0x42u8; KEY_SIZE])
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = test_key();
        let blob = seal_token("usbmuxd", &key).unwrap();

        // Transport-safe: single line, no raw bytes
        assert!(!blob.contains('\n'));

        let token = open_token(&blob, &key).unwrap();
        assert_eq!(token, "usbmuxd");
    }

    #[test]
    fn test_seal_never_repeats() {
        let key = test_key();

        let mut blobs = HashSet::new();
        for _ in 0..64 {
            let blob = seal_token("forward", &key).unwrap();
            assert!(blobs.insert(blob), "nonce reuse produced identical blob");
        }
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let result = HandshakeKey::from_slice(&[0u8; 16]);
        assert!(matches!(
            result,
            Err(Error::InvalidKeyLength { actual: 16 })
        ));

        let result = HandshakeKey::from_slice(&[0u8; 33]);
        assert!(matches!(
            result,
            Err(Error::InvalidKeyLength { actual: 33 })
        ));
    }

    #[test]
    fn test_undecodable_key_rejected() {
        let result = HandshakeKey::from_base64("not base64!!!");
        assert!(matches!(result, Err(Error::KeyDecode(_))));
    }

    #[test]
    fn test_base64_key_round_trip() {
        let encoded = BASE64.encode([0x17u8; KEY_SIZE]);
        let key = HandshakeKey::from_base64(&encoded).unwrap();

        let blob = seal_token("t", &key).unwrap();
        assert_eq!(open_token(&blob, &key).unwrap(), "t");
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = test_key();
        let blob = seal_token("usbmuxd", &key).unwrap();

        let mut raw = BASE64.decode(&blob).unwrap();
        raw[NONCE_SIZE] ^= 0x01; // flip one ciphertext bit
        let tampered = BASE64.encode(raw);

        assert!(matches!(open_token(&tampered, &key), Err(Error::Decrypt)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = seal_token("usbmuxd", &test_key()).unwrap();
        let other = HandshakeKey::from_bytes([0x01u8; KEY_SIZE]);

        assert!(matches!(open_token(&blob, &other), Err(Error::Decrypt)));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = test_key();
        let short = BASE64.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
        assert!(matches!(open_token(&short, &key), Err(Error::Decrypt)));
    }
}
