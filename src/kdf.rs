//! Passphrase key derivation using PBKDF2-HMAC-SHA512
//!
//! Derivation is deterministic on purpose: the salt is fixed per deployment
//! rather than per message, so the same passphrase always yields the same
//! key. Site passwords rely on that property.

use std::fmt;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};

/// Length of the deployment salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count
pub const ITERATIONS: u32 = 600_000;

/// Shortest site password we will hand out
pub const SITE_PASSWORD_MIN_LEN: usize = 8;

/// Longest site password; the full unpadded base64 rendering of a key
pub const SITE_PASSWORD_MAX_LEN: usize = 43;

pub const SITE_PASSWORD_DEFAULT_LEN: usize = 24;

/// Deployment-wide salt, loaded once at startup.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Parse a salt from exactly 32 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.trim();
        if hex_str.len() != SALT_LEN * 2 {
            return Err(SealnoteError::with_kind(
                ErrorCategory::Configuration,
                ErrorKind::ConfigurationInvalid,
                format!(
                    "salt must be {} hex characters, got {}",
                    SALT_LEN * 2,
                    hex_str.len()
                ),
            ));
        }

        let mut bytes = [0u8; SALT_LEN];
        hex::decode_to_slice(hex_str, &mut bytes).map_err(|e| {
            SealnoteError::with_kind_and_source(
                ErrorCategory::Configuration,
                ErrorKind::ConfigurationInvalid,
                "salt is not valid hex",
                e,
            )
        })?;

        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// A 256-bit symmetric key, wiped from memory on drop.
///
/// Deliberately not `Clone`: each cipher call derives and owns its own key.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive a 32-byte key from a passphrase and the deployment salt.
pub fn derive(passphrase: &[u8], salt: &Salt) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha512>(passphrase, salt.as_bytes(), ITERATIONS, &mut key[..]);
    debug!(iterations = ITERATIONS, "derived key");
    DerivedKey(key)
}

/// Derive on a blocking worker, giving up after `timeout`.
///
/// On expiry the worker still runs to completion in the background and its
/// key is dropped (and wiped) unseen. Must be called inside a tokio runtime.
pub async fn derive_with_timeout(
    passphrase: Zeroizing<Vec<u8>>,
    salt: Salt,
    timeout: Duration,
) -> Result<DerivedKey> {
    let task = tokio::task::spawn_blocking(move || derive(&passphrase, &salt));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(key)) => Ok(key),
        Ok(Err(e)) => Err(SealnoteError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "key derivation task failed",
            e,
        )),
        Err(e) => Err(SealnoteError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::DerivationTimeout,
            format!("key derivation exceeded {:?}", timeout),
            e,
        )),
    }
}

/// Derive a reproducible password for `label` from a master passphrase.
///
/// The master and label are joined with a NUL byte so that ("ab", "c") and
/// ("a", "bc") never collide.
pub fn derive_site_password(
    master: &[u8],
    label: &str,
    salt: &Salt,
    length: usize,
) -> Result<Zeroizing<String>> {
    if !(SITE_PASSWORD_MIN_LEN..=SITE_PASSWORD_MAX_LEN).contains(&length) {
        return Err(SealnoteError::with_kind(
            ErrorCategory::User,
            ErrorKind::ValidationRejected,
            format!(
                "password length must be between {} and {}",
                SITE_PASSWORD_MIN_LEN, SITE_PASSWORD_MAX_LEN
            ),
        ));
    }

    let mut input = Zeroizing::new(Vec::with_capacity(master.len() + 1 + label.len()));
    input.extend_from_slice(master);
    input.push(0);
    input.extend_from_slice(label.as_bytes());

    let key = derive(&input, salt);
    let mut password = Zeroizing::new(URL_SAFE_NO_PAD.encode(key.as_bytes()));
    password.truncate(length);
    Ok(password)
}
