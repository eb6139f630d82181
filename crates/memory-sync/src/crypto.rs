//! Per-field encryption for data leaving the device
//!
//! A 256-bit key is derived once from the user's password with
//! PBKDF2-HMAC-SHA256. Every field is sealed separately with
//! XChaCha20-Poly1305 under a fresh random nonce:
//!
//! ```text
//! b"MS1" || nonce (24 bytes) || ciphertext + tag
//! ```
//!
//! Text fields travel as base64 of the sealed bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::Sha256;

use crate::error::DecryptionError;

const FIELD_MAGIC: &[u8; 3] = b"MS1";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// Symmetric cipher bound to one password.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Derive the field key from `password`. `salt` is the account identifier
    /// so every device of the same account derives the same key.
    pub fn new(password: &str, salt: &str) -> Self {
        Self::with_rounds(password, salt, PBKDF2_ROUNDS)
    }

    pub fn with_rounds(password: &str, salt: &str, rounds: u32) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Seal raw bytes.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        // Encryption into a Vec only fails on plaintexts beyond the cipher's
        // 256 GiB limit.
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .unwrap_or_default();

        let mut sealed = Vec::with_capacity(FIELD_MAGIC.len() + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(FIELD_MAGIC);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        sealed
    }

    /// Open bytes produced by [`FieldCipher::encrypt_bytes`].
    pub fn decrypt_bytes(&self, sealed: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let header = FIELD_MAGIC.len() + NONCE_LEN;
        if sealed.len() < header + TAG_LEN {
            return Err(DecryptionError::Truncated(sealed.len()));
        }
        if &sealed[..FIELD_MAGIC.len()] != FIELD_MAGIC {
            return Err(DecryptionError::UnknownFormat);
        }
        let nonce = XNonce::from_slice(&sealed[FIELD_MAGIC.len()..header]);
        self.cipher
            .decrypt(nonce, &sealed[header..])
            .map_err(|_| DecryptionError::Authentication)
    }

    /// Seal a text field into its base64 wire form.
    pub fn encrypt_text(&self, plaintext: &str) -> String {
        STANDARD.encode(self.encrypt_bytes(plaintext.as_bytes()))
    }

    pub fn decrypt_text(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        let sealed = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| DecryptionError::Encoding)?;
        let plaintext = self.decrypt_bytes(&sealed)?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::Utf8)
    }

    /// Seal an optional text field. Absent and empty fields stay absent.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Option<String> {
        plaintext
            .filter(|value| !value.is_empty())
            .map(|value| self.encrypt_text(value))
    }
}
