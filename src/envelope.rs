//! Encryption/decryption using AES-256-GCM, framed and base91-encoded
//!
//! The binary envelope is:
//! - iv: 12 bytes, fresh from the OS RNG for every message
//! - ciphertext: same length as the plaintext
//! - tag: 16 bytes (GCM authentication tag)
//!
//! The envelope travels as base91 text (see `crate::base91`).

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use tracing::debug;

use crate::base91;
use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};
use crate::kdf::{self, DerivedKey, Salt};

/// Length of the GCM nonce in bytes
pub const IV_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Smallest possible envelope: an empty message
pub const MIN_ENVELOPE_LEN: usize = IV_LEN + TAG_LEN;

/// Encrypt plaintext under `key` with a random IV, returning base91 text.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<String> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    encrypt_with_iv(plaintext, key, &iv)
}

/// Encrypt plaintext under `key` using the provided IV.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates a random IV.
/// Reusing an IV under the same key breaks GCM completely.
pub fn encrypt_with_iv(plaintext: &[u8], key: &DerivedKey, iv: &[u8; IV_LEN]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let sealed = cipher.encrypt(Nonce::from_slice(iv), plaintext).map_err(|_| {
        SealnoteError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::CryptoFailed,
            "encryption failed",
        )
    })?;

    let mut envelope = Vec::with_capacity(IV_LEN + sealed.len());
    envelope.extend_from_slice(iv);
    envelope.extend_from_slice(&sealed);

    let encoded = base91::encode(&envelope);
    debug!(
        plaintext_len = plaintext.len(),
        payload_len = encoded.len(),
        "sealed envelope"
    );
    Ok(encoded)
}

/// Decrypt base91 text produced by [`encrypt`].
///
/// A payload that does not decode to at least [`MIN_ENVELOPE_LEN`] bytes is
/// reported as `DecodeFailed`. Everything past that point, wrong key and
/// tampering alike, is reported as one `CryptoFailed` error.
pub fn decrypt(encoded: &str, key: &DerivedKey) -> Result<Vec<u8>> {
    let envelope = unframe(encoded)?;
    open_envelope(&envelope, key)
}

/// Derive a key from `passphrase` and encrypt `plaintext` under it.
pub fn seal(passphrase: &[u8], salt: &Salt, plaintext: &[u8]) -> Result<String> {
    let key = kdf::derive(passphrase, salt);
    encrypt(plaintext, &key)
}

/// Decrypt a payload with a key derived from `passphrase`.
///
/// The payload is decoded before derivation so malformed input never
/// costs a full key stretch.
pub fn open(passphrase: &[u8], salt: &Salt, encoded: &str) -> Result<Vec<u8>> {
    let envelope = unframe(encoded)?;
    let key = kdf::derive(passphrase, salt);
    open_envelope(&envelope, &key)
}

/// Like [`open`], but also requires the plaintext to be UTF-8.
pub fn open_text(passphrase: &[u8], salt: &Salt, encoded: &str) -> Result<String> {
    let plaintext = open(passphrase, salt, encoded)?;
    String::from_utf8(plaintext).map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::DecodeFailed,
            "decrypted message is not valid UTF-8",
            e,
        )
    })
}

/// Decode a payload into envelope bytes, checking only the minimum length.
pub(crate) fn unframe(encoded: &str) -> Result<Vec<u8>> {
    let envelope = base91::decode(encoded).ok_or_else(|| {
        SealnoteError::with_kind(
            ErrorCategory::User,
            ErrorKind::DecodeFailed,
            "payload is not valid base91",
        )
    })?;

    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(SealnoteError::with_kind(
            ErrorCategory::User,
            ErrorKind::DecodeFailed,
            format!(
                "envelope is {} bytes, shorter than the {} byte minimum; likely truncated",
                envelope.len(),
                MIN_ENVELOPE_LEN
            ),
        ));
    }

    Ok(envelope)
}

/// `envelope` must have passed [`unframe`].
pub(crate) fn open_envelope(envelope: &[u8], key: &DerivedKey) -> Result<Vec<u8>> {
    let (iv, sealed) = envelope.split_at(IV_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| SealnoteError::crypto())?;

    debug!(plaintext_len = plaintext.len(), "opened envelope");
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn test_key(fill: u8) -> DerivedKey {
        DerivedKey::from_bytes([fill; kdf::KEY_LEN])
    }

    fn flip_bit(encoded: &str, bit: usize) -> String {
        let mut envelope = base91::decode(encoded).unwrap();
        envelope[bit / 8] ^= 1 << (bit % 8);
        base91::encode(&envelope)
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key(1);
        let encoded = encrypt(b"", &key).unwrap();

        assert_eq!(base91::decode(&encoded).unwrap().len(), MIN_ENVELOPE_LEN);
        assert_eq!(decrypt(&encoded, &key).unwrap(), b"");
    }

    #[test]
    fn test_small_plaintext() {
        let key = test_key(1);
        let encoded = encrypt(b"hello", &key).unwrap();

        assert_eq!(base91::decode(&encoded).unwrap().len(), MIN_ENVELOPE_LEN + 5);
        assert_eq!(decrypt(&encoded, &key).unwrap(), b"hello");
    }

    #[test]
    fn test_one_mebibyte_plaintext() {
        let key = test_key(7);
        let plaintext: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

        let encoded = encrypt(&plaintext, &key).unwrap();
        assert!(encoded.chars().all(base91::is_alphabet_symbol));
        assert_eq!(decrypt(&encoded, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let key = test_key(1);
        let first = encrypt(b"hello world", &key).unwrap();
        let second = encrypt(b"hello world", &key).unwrap();

        assert_ne!(first, second);
        let iv1 = &base91::decode(&first).unwrap()[..IV_LEN];
        let iv2 = &base91::decode(&second).unwrap()[..IV_LEN];
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn test_deterministic_with_fixed_iv() {
        let key = test_key(3);
        let iv = [9u8; IV_LEN];

        let first = encrypt_with_iv(b"hello world", &key, &iv).unwrap();
        let second = encrypt_with_iv(b"hello world", &key, &iv).unwrap();
        assert_eq!(first, second);
        assert_eq!(decrypt(&first, &key).unwrap(), b"hello world");
    }

    #[test]
    fn test_known_vector() {
        // Key is PBKDF2-HMAC-SHA512("correct-horse", 8f3c1d2a..., 600000).
        let mut key_bytes = [0u8; kdf::KEY_LEN];
        hex::decode_to_slice(
            "133195a66a4c9331d0513429497bff18ed5fe73ae730991473fc7673abb0df4b",
            &mut key_bytes,
        )
        .unwrap();
        let key = DerivedKey::from_bytes(key_bytes);
        let iv: [u8; IV_LEN] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

        let encoded = encrypt_with_iv(b"hello world", &key, &iv).unwrap();
        assert_eq!(encoded, ":C#(:C?hVB$MSid<R<O]=QWEPv,uX+do:StTV!3CFECn3U6X");
    }

    #[test]
    fn test_wrong_key() {
        let encoded = encrypt(b"secret data", &test_key(1)).unwrap();
        let err = decrypt(&encoded, &test_key(2)).expect_err("expected auth failure");

        assert_eq!(err.kind, Some(ErrorKind::CryptoFailed));
        assert!(
            err.to_string()
                .contains("corrupt input, tampered-with data, or bad passphrase")
        );
    }

    #[test]
    fn test_every_bit_flip_detected() {
        let key = test_key(5);
        let encoded = encrypt(b"hello world", &key).unwrap();
        let total_bits = (MIN_ENVELOPE_LEN + 11) * 8;

        for bit in 0..total_bits {
            let tampered = flip_bit(&encoded, bit);
            let err = decrypt(&tampered, &key).expect_err("tampering went unnoticed");
            assert_eq!(err.kind, Some(ErrorKind::CryptoFailed), "bit {}", bit);
        }
    }

    #[test]
    fn test_random_bit_flips_detected() {
        let key = test_key(6);
        let plaintext = vec![0x5Au8; 4096];
        let encoded = encrypt(&plaintext, &key).unwrap();
        let total_bits = (MIN_ENVELOPE_LEN + plaintext.len()) * 8;
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let bit = rng.gen_range(0..total_bits);
            let tampered = flip_bit(&encoded, bit);
            assert!(decrypt(&tampered, &key).is_err(), "bit {}", bit);
        }
    }

    #[test]
    fn test_truncated_envelope() {
        let key = test_key(1);
        let short = base91::encode(&[0u8; MIN_ENVELOPE_LEN - 1]);
        let err = decrypt(&short, &key).expect_err("expected decode failure");
        assert_eq!(err.kind, Some(ErrorKind::DecodeFailed));

        let err = decrypt("", &key).expect_err("expected decode failure");
        assert_eq!(err.kind, Some(ErrorKind::DecodeFailed));
    }

    #[test]
    fn test_foreign_symbols_rejected() {
        let key = test_key(1);
        let encoded = encrypt(b"hello", &key).unwrap();

        let err = decrypt(&format!("{}\n", encoded), &key).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::DecodeFailed));

        let err = decrypt(&format!("-{}", encoded), &key).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::DecodeFailed));
    }

    #[test]
    fn test_decode_and_crypto_failures_look_alike() {
        let key = test_key(1);
        let decode_err = decrypt("A", &key).unwrap_err();
        let crypto_err = decrypt(&encrypt(b"x", &test_key(2)).unwrap(), &key).unwrap_err();
        assert_eq!(decode_err.public_message(), crypto_err.public_message());
    }

    #[test]
    fn test_seal_open_scenario() {
        let salt = Salt::from_hex("8f3c1d2a9b7e4f60a1b2c3d4e5f60718").unwrap();

        let payload = seal(b"correct-horse", &salt, b"hello world").unwrap();
        assert_eq!(
            open_text(b"correct-horse", &salt, &payload).unwrap(),
            "hello world"
        );

        let err = open(b"wrong-horse", &salt, &payload).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::CryptoFailed));
    }
}
