//! Encrypted secrets in settings files.
//!
//! A password or token may be stored as `enc:<base64>`. The payload is
//! `nonce (12 bytes) || AES-256-GCM ciphertext || tag`. Nothing here reads
//! the environment; callers build a [`MasterKey`] and hand it to the
//! settings loader.
//!
//! ```rust
//! use tabula::crypto::{encrypted_payload, MasterKey};
//!
//! let key = MasterKey::generate().expect("rng available");
//! let stored = key.encrypt_secret("my secret password").expect("encryption failed");
//! assert!(stored.starts_with("enc:"));
//! assert_eq!(
//!     key.decrypt_to_string(encrypted_payload(&stored).unwrap()).unwrap(),
//!     "my secret password"
//! );
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

pub const KEY_LENGTH: usize = 32;

/// Marks a settings value as ciphertext.
pub const ENCRYPTED_PREFIX: &str = "enc:";

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("system random source failed")]
    Random,

    #[error("master key must be {KEY_LENGTH} bytes of base64")]
    InvalidKey,

    #[error("encrypted value is not a valid payload")]
    MalformedPayload,

    #[error("cannot encrypt secret")]
    Seal,

    /// Wrong key or tampered payload; AES-GCM cannot tell them apart.
    #[error("cannot decrypt secret (wrong key or corrupted value)")]
    Open,

    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

/// The payload of an `enc:` value, or `None` for plain text.
pub fn encrypted_payload(value: &str) -> Option<&str> {
    value.strip_prefix(ENCRYPTED_PREFIX).map(str::trim)
}

/// Key used to encrypt and decrypt `enc:` settings values.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; KEY_LENGTH]);

impl MasterKey {
    /// A fresh key from the system RNG.
    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; KEY_LENGTH];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Parse a key as printed by `tabula generate-key`. Surrounding
    /// whitespace is ignored.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidKey`] unless the input is base64 of exactly
    /// [`KEY_LENGTH`] bytes.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey)?;
        <[u8; KEY_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Encrypt `plaintext` into a complete `enc:` settings value.
    pub fn encrypt_secret(&self, plaintext: &str) -> CryptoResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        fill_random(&mut nonce)?;

        let mut sealed = plaintext.as_bytes().to_vec();
        self.aead(CryptoError::Seal)?
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
            .map_err(|_| CryptoError::Seal)?;

        let mut payload = nonce.to_vec();
        payload.append(&mut sealed);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(payload)))
    }

    /// Decrypt the base64 payload of an `enc:` value (prefix already removed,
    /// see [`encrypted_payload`]).
    ///
    /// # Errors
    ///
    /// * [`CryptoError::MalformedPayload`] - not base64, or too short to hold
    ///   a nonce and a tag
    /// * [`CryptoError::Open`] - wrong key or tampered payload
    /// * [`CryptoError::NotUtf8`] - decrypted bytes are not text
    pub fn decrypt_to_string(&self, payload: &str) -> CryptoResult<String> {
        let mut data = BASE64
            .decode(payload)
            .map_err(|_| CryptoError::MalformedPayload)?;
        if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::MalformedPayload);
        }

        let mut sealed = data.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&data).map_err(|_| CryptoError::MalformedPayload)?;
        let plaintext = self
            .aead(CryptoError::Open)?
            .open_in_place(nonce, Aad::empty(), &mut sealed)
            .map_err(|_| CryptoError::Open)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::NotUtf8)
    }

    fn aead(&self, on_error: CryptoError) -> CryptoResult<LessSafeKey> {
        UnboundKey::new(&AES_256_GCM, &self.0)
            .map(LessSafeKey::new)
            .map_err(|_| on_error)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    SystemRandom::new().fill(buf).map_err(|_| CryptoError::Random)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(stored: &str) -> &str {
        encrypted_payload(stored).unwrap()
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(MasterKey::generate().unwrap(), MasterKey::generate().unwrap());
    }

    #[test]
    fn test_key_parses_with_whitespace() {
        let key = MasterKey::generate().unwrap();
        let again = MasterKey::from_base64(&format!(" {}\n", key.to_base64())).unwrap();
        assert_eq!(key, again);
    }

    #[test]
    fn test_bad_keys_rejected() {
        assert!(matches!(MasterKey::from_base64("not valid base64!!!"), Err(CryptoError::InvalidKey)));
        assert!(matches!(
            MasterKey::from_base64(&BASE64.encode(b"too short")),
            Err(CryptoError::InvalidKey)
        ));
    }

    #[test]
    fn test_secret_decrypts() {
        let key = MasterKey::generate().unwrap();
        let stored = key.encrypt_secret("s3cret").unwrap();
        assert_eq!(key.decrypt_to_string(payload_of(&stored)).unwrap(), "s3cret");
    }

    #[test]
    fn test_plain_values_have_no_payload() {
        assert_eq!(encrypted_payload("plain"), None);
        assert_eq!(encrypted_payload("enc: abc "), Some("abc"));
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let key = MasterKey::generate().unwrap();
        assert_ne!(key.encrypt_secret("same").unwrap(), key.encrypt_secret("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let stored = MasterKey::generate().unwrap().encrypt_secret("secret data").unwrap();
        let other = MasterKey::generate().unwrap();
        assert!(matches!(other.decrypt_to_string(payload_of(&stored)), Err(CryptoError::Open)));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = MasterKey::generate().unwrap();
        let stored = key.encrypt_secret("sensitive data").unwrap();
        let mut data = BASE64.decode(payload_of(&stored)).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(matches!(key.decrypt_to_string(&BASE64.encode(&data)), Err(CryptoError::Open)));
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let key = MasterKey::generate().unwrap();
        assert!(matches!(
            key.decrypt_to_string(&BASE64.encode(b"short")),
            Err(CryptoError::MalformedPayload)
        ));
        assert!(matches!(key.decrypt_to_string("%%%"), Err(CryptoError::MalformedPayload)));
    }
}
