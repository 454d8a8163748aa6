//! Message-text encryption and identifier hashing.
//!
//! Text bodies are sealed with ChaCha20-Poly1305 under a shared 32-byte key.
//! Wire format is `base64(nonce (12 bytes) | ciphertext + tag)`, so every
//! stored value carries its own random nonce.

use std::fmt;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    chacha20poly1305::{
        ChaCha20Poly1305, Nonce,
        aead::{Aead, KeyInit},
    },
    rand::RngCore,
    secrecy::{ExposeSecret, Secret},
    sha2::{Digest, Sha256},
    tracing::warn,
};

use crate::error::CipherError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Well-known development key. Only accepted when explicitly allowed.
pub const INSECURE_DEFAULT_KEY: &str = "0123456789ABCDEF0123456789ABCDEF";

pub struct MessageCipher {
    aead: ChaCha20Poly1305,
}

impl MessageCipher {
    /// Build a cipher from raw key bytes, which must be exactly 32 long.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        let aead = ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            }
        })?;
        Ok(Self { aead })
    }

    /// Build a cipher from the configured key.
    ///
    /// Without a key this fails, unless `allow_insecure_default` is set, in
    /// which case the well-known development key is used.
    pub fn from_secret(
        key: Option<&Secret<String>>,
        allow_insecure_default: bool,
    ) -> Result<Self, CipherError> {
        match key {
            Some(key) => Self::new(key.expose_secret().as_bytes()),
            None if allow_insecure_default => {
                warn!("no encryption key configured, using the insecure default key");
                Self::new(INSECURE_DEFAULT_KEY.as_bytes())
            },
            None => Err(CipherError::MissingKey),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let data = STANDARD.decode(encoded)?;
        if data.len() < NONCE_LEN {
            return Err(CipherError::Decrypt);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self
            .aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CipherError::Decrypt)
    }
}

impl fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Lowercase hex SHA-256 of an identifier. Used for partition names and the
/// `user`, `from` and `chat` record fields.
pub fn hash_identifier(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> MessageCipher {
        MessageCipher::new(INSECURE_DEFAULT_KEY.as_bytes()).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_restores_text() {
        let cipher = cipher();
        let long = "long ".repeat(500);
        for text in ["hello", "", "ünïcødé 🗺️", long.as_str()] {
            let sealed = cipher.encrypt(text).unwrap();
            assert_ne!(sealed, text);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), text);
        }
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = cipher().encrypt("secret").unwrap();
        let other = MessageCipher::new(&[7u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn garbage_input_is_rejected() {
        let cipher = cipher();
        assert!(matches!(cipher.decrypt("***"), Err(CipherError::Encoding(_))));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CipherError::Decrypt)));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            MessageCipher::new(b"short"),
            Err(CipherError::InvalidKeyLength {
                expected: 32,
                actual: 5
            })
        ));
    }

    #[test]
    fn missing_key_requires_opt_in() {
        assert!(matches!(
            MessageCipher::from_secret(None, false),
            Err(CipherError::MissingKey)
        ));
        assert!(MessageCipher::from_secret(None, true).is_ok());

        let key = Secret::new("k".repeat(32));
        assert!(MessageCipher::from_secret(Some(&key), false).is_ok());
    }

    #[test]
    fn debug_hides_key() {
        assert!(!format!("{:?}", cipher()).contains("0123"));
    }

    #[test]
    fn identifier_hash_is_sha256_hex() {
        assert_eq!(
            hash_identifier("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_identifier("u1").len(), 64);
    }
}
