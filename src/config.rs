//! Startup configuration
//!
//! Built once, before any request is served. Anything wrong here is a
//! `Configuration` error and should stop the process.

use std::env;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::debug;

use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};
use crate::kdf::{SALT_LEN, Salt};
use crate::ratelimit::{DEFAULT_CAPACITY, RateLimitConfig};

pub const ENV_SALT: &str = "SEALNOTE_SALT";
pub const ENV_RATE_CAPACITY: &str = "SEALNOTE_RATE_CAPACITY";
pub const ENV_RATE_WINDOW_SECS: &str = "SEALNOTE_RATE_WINDOW_SECS";

pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Longest rate window accepted. Anything longer is a typo, and far longer
/// values overflow the limiter's timestamps.
pub const MAX_RATE_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Generous enough for 600k rounds on slow hardware.
pub const DEFAULT_DERIVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub salt: Salt,
    pub rate_capacity: u32,
    pub rate_window: Duration,
    pub derive_timeout: Duration,
}

impl Config {
    pub fn new(salt: Salt) -> Self {
        Self {
            salt,
            rate_capacity: DEFAULT_CAPACITY,
            rate_window: DEFAULT_RATE_WINDOW,
            derive_timeout: DEFAULT_DERIVE_TIMEOUT,
        }
    }

    pub fn from_salt_hex(salt_hex: &str) -> Result<Self> {
        Ok(Self::new(Salt::from_hex(salt_hex)?))
    }

    /// Read settings from `SEALNOTE_*` environment variables.
    ///
    /// The salt is required; the rest fall back to defaults when unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(SealnoteError::with_kind_and_source(
                ErrorCategory::Configuration,
                ErrorKind::ConfigurationInvalid,
                format!("{} is not valid unicode", name),
                e,
            )),
        })
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let salt_hex = lookup(ENV_SALT)?.ok_or_else(|| {
            invalid(&format!(
                "{} must be set to {} hex characters",
                ENV_SALT,
                SALT_LEN * 2
            ))
        })?;
        let mut config = Self::from_salt_hex(&salt_hex)?;

        if let Some(raw) = lookup(ENV_RATE_CAPACITY)? {
            let capacity = parse_number(ENV_RATE_CAPACITY, &raw)?;
            let capacity = u32::try_from(capacity).map_err(|e| {
                SealnoteError::with_kind_and_source(
                    ErrorCategory::Configuration,
                    ErrorKind::ConfigurationInvalid,
                    format!("{} is too large", ENV_RATE_CAPACITY),
                    e,
                )
            })?;
            config = config.rate_capacity(capacity);
        }
        if let Some(raw) = lookup(ENV_RATE_WINDOW_SECS)? {
            let secs = parse_number(ENV_RATE_WINDOW_SECS, &raw)?;
            config = config.rate_window(Duration::from_secs(secs));
        }

        config.validate()?;
        debug!(
            rate_capacity = config.rate_capacity,
            rate_window_secs = config.rate_window.as_secs(),
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn rate_capacity(mut self, capacity: u32) -> Self {
        self.rate_capacity = capacity;
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    pub fn derive_timeout(mut self, timeout: Duration) -> Self {
        self.derive_timeout = timeout;
        self
    }

    /// Reject settings that would make the limiter or derivation useless.
    pub fn validate(&self) -> Result<()> {
        if self.rate_capacity == 0 {
            return Err(invalid("rate capacity must be at least 1"));
        }
        if self.rate_window.is_zero() {
            return Err(invalid("rate window must be longer than zero"));
        }
        if self.rate_window > MAX_RATE_WINDOW {
            return Err(invalid(&format!(
                "rate window must be at most {} seconds",
                MAX_RATE_WINDOW.as_secs()
            )));
        }
        if self.derive_timeout.is_zero() {
            return Err(invalid("derivation timeout must be longer than zero"));
        }
        self.rate_limit()?;
        Ok(())
    }

    /// Limiter settings in the form `RateLimiter` takes.
    pub fn rate_limit(&self) -> Result<RateLimitConfig> {
        let window = TimeDelta::from_std(self.rate_window).map_err(|e| {
            SealnoteError::with_kind_and_source(
                ErrorCategory::Configuration,
                ErrorKind::ConfigurationInvalid,
                "rate window is out of range",
                e,
            )
        })?;
        Ok(RateLimitConfig {
            capacity: self.rate_capacity,
            window,
        })
    }
}

fn invalid(msg: &str) -> SealnoteError {
    SealnoteError::with_kind(
        ErrorCategory::Configuration,
        ErrorKind::ConfigurationInvalid,
        msg,
    )
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::Configuration,
            ErrorKind::ConfigurationInvalid,
            format!("{} must be a whole number, got {:?}", name, raw),
            e,
        )
    })
}
