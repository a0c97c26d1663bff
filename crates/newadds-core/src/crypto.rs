//! Refresh-token encryption at rest
//!
//! Every call to [`TokenCodec::encrypt`] draws a fresh salt and IV, derives a
//! per-call key from the long-lived secret with PBKDF2-HMAC-SHA256, and seals
//! the plaintext with AES-256-GCM. The blob is
//!
//! ```text
//! base64( salt[64] ‖ iv[16] ‖ tag[16] ‖ ciphertext )
//! ```
//!
//! so it carries everything needed to decrypt it except the secret.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{Error, Result};

/// AES-256-GCM with a 128-bit IV
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Salt length in bytes
pub const SALT_LEN: usize = 64;
/// IV length in bytes
pub const IV_LEN: usize = 16;
/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;
/// Fixed header preceding the ciphertext
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;
/// PBKDF2 rounds per key derivation
pub const KDF_ITERATIONS: u32 = 100_000;
/// Derived key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;
/// Shortest secret accepted, in UTF-16 code units
pub const MIN_SECRET_LEN: usize = 32;

/// Length of a secret as checked against [`MIN_SECRET_LEN`]
///
/// Counted in UTF-16 code units, so a character outside the Basic
/// Multilingual Plane counts twice. Existing deployments validated their
/// keys this way.
pub fn secret_len(secret: &str) -> usize {
    secret.encode_utf16().count()
}

/// Authenticated codec for refresh tokens
///
/// The Debug implementation intentionally does NOT expose the secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec from the long-lived secret
    ///
    /// # Errors
    ///
    /// `Error::Config` when [`secret_len`] is below [`MIN_SECRET_LEN`].
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret_len(&secret) < MIN_SECRET_LEN {
            return Err(Error::config(format!(
                "Encryption key must be at least {} characters long",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self { secret })
    }

    /// Encrypt a string into a self-describing blob
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        let mut rng = rand::rngs::OsRng;
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let cipher = self.cipher_for(&salt)?;
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| Error::Other("Encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + buffer.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&buffer);

        Ok(BASE64.encode(blob))
    }

    /// Encrypt raw bytes that are expected to be UTF-8 text
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` when `bytes` is not valid UTF-8.
    pub fn encrypt_bytes(&self, bytes: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::invalid_input(format!("Input must be a string: {}", e)))?;
        self.encrypt(text)
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt)
    ///
    /// # Errors
    ///
    /// - `Error::Decryption`: not base64, shorter than the header, or the
    ///   authentication check failed (wrong secret, corruption, tampering)
    /// - `Error::InvalidInput`: the authenticated plaintext is not UTF-8
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let raw = BASE64
            .decode(blob.trim())
            .map_err(|e| Error::decryption(format!("blob is not valid base64: {}", e)))?;

        if raw.len() < HEADER_LEN {
            return Err(Error::decryption(format!(
                "Invalid encrypted data length: {} bytes, header alone is {}",
                raw.len(),
                HEADER_LEN
            )));
        }

        let (salt, rest) = raw.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = self.cipher_for(salt)?;
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(iv),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| Error::decryption("authentication check failed"))?;

        String::from_utf8(buffer)
            .map_err(|_| Error::invalid_input("decrypted payload is not a string"))
    }

    /// Cheap structural check: decodes and is at least as long as the header
    ///
    /// Does not authenticate the blob.
    pub fn validate(blob: &str) -> bool {
        BASE64
            .decode(blob.trim())
            .map(|raw| raw.len() >= HEADER_LEN)
            .unwrap_or(false)
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.secret.as_bytes(), salt, KDF_ITERATIONS, &mut key);
        key
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<Aes256Gcm16> {
        let key = self.derive_key(salt);
        Aes256Gcm16::new_from_slice(&key)
            .map_err(|e| Error::config(format!("Invalid derived key: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef-test";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET).unwrap()
    }

    #[test]
    fn round_trips_assorted_strings() {
        let codec = codec();
        let samples = [
            "",
            "a",
            "AQB-refresh-token_value",
            "Special chars: !@#$%^&*()",
            "Unicode: 你好世界",
            "Mixed: 123!@#你好 🎵",
        ];

        for sample in samples {
            let blob = codec.encrypt(sample).unwrap();
            assert_eq!(codec.decrypt(&blob).unwrap(), sample);
        }

        let long = "a".repeat(1000);
        let blob = codec.encrypt(&long).unwrap();
        assert_eq!(codec.decrypt(&blob).unwrap(), long);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let codec = codec();
        let first = codec.encrypt("token").unwrap();
        let second = codec.encrypt("token").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn blob_layout_is_header_plus_ciphertext() {
        let codec = codec();
        let blob = codec.encrypt("hello").unwrap();
        let raw = BASE64.decode(&blob).unwrap();
        assert_eq!(raw.len(), HEADER_LEN + "hello".len());
        assert!(TokenCodec::validate(&blob));
    }

    #[test]
    fn short_blob_is_a_decryption_error() {
        let codec = codec();
        let short = BASE64.encode([0u8; HEADER_LEN - 1]);
        assert!(matches!(codec.decrypt(&short), Err(Error::Decryption(_))));
        assert!(!TokenCodec::validate(&short));
    }

    #[test]
    fn flipped_final_bit_is_a_decryption_error() {
        let codec = codec();
        let blob = codec.encrypt("refresh-token").unwrap();
        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        assert!(matches!(codec.decrypt(&tampered), Err(Error::Decryption(_))));
    }

    #[test]
    fn tampered_empty_plaintext_tag_is_rejected() {
        let codec = codec();
        let blob = codec.encrypt("").unwrap();
        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x80;

        assert!(matches!(
            codec.decrypt(&BASE64.encode(raw)),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn non_base64_is_a_decryption_error() {
        let codec = codec();
        assert!(matches!(codec.decrypt("invalid"), Err(Error::Decryption(_))));
        assert!(!TokenCodec::validate("not base64 at all!"));
        assert!(!TokenCodec::validate(""));
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let blob = codec().encrypt("refresh-token").unwrap();
        let other = TokenCodec::new("another-secret-that-is-long-enough!!").unwrap();
        assert!(matches!(other.decrypt(&blob), Err(Error::Decryption(_))));
    }

    #[test]
    fn separate_instances_share_the_secret() {
        let blob = codec().encrypt("persisted").unwrap();
        assert_eq!(codec().decrypt(&blob).unwrap(), "persisted");
    }

    #[test]
    fn non_utf8_bytes_are_invalid_input() {
        let codec = codec();
        let result = codec.encrypt_bytes(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let blob = codec.encrypt_bytes("ok".as_bytes()).unwrap();
        assert_eq!(codec.decrypt(&blob).unwrap(), "ok");
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(matches!(TokenCodec::new("too-short"), Err(Error::Config(_))));
    }

    #[test]
    fn secret_length_counts_utf16_units() {
        // Each key emoji is one char but two UTF-16 units
        let sixteen_keys = "\u{1F511}".repeat(16);
        assert_eq!(secret_len(&sixteen_keys), 32);
        assert!(TokenCodec::new(sixteen_keys).is_ok());

        let short = format!("{}a", "\u{1F511}".repeat(15));
        assert_eq!(secret_len(&short), 31);
        assert!(matches!(TokenCodec::new(short), Err(Error::Config(_))));
    }

    #[test]
    fn secret_not_exposed_in_debug() {
        let debug = format!("{:?}", codec());
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("TokenCodec"));
    }
}
