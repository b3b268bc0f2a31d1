use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Text shown to callers for any failure to turn a payload back into plaintext.
///
/// Decode and authentication failures deliberately share it, so a caller
/// cannot tell a mangled payload from a wrong passphrase.
pub const UNPROCESSABLE_MESSAGE: &str = "unable to process the supplied payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    Internal,

    /// The caller provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,

    /// The process was started with unusable settings. Fatal at startup.
    Configuration,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Salt or another startup setting is missing or malformed.
    ConfigurationInvalid,
    /// Untrusted input was rejected by a validator.
    ValidationRejected,
    /// The identity has used up its window; see `SealnoteError::reset_at`.
    RateLimited,
    /// The payload text is not a well-formed envelope.
    DecodeFailed,
    /// Authentication failed due to an incorrect passphrase, tampering or
    /// corruption. Never more specific than that.
    CryptoFailed,
    /// Key derivation did not finish within the caller's deadline.
    DerivationTimeout,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
    /// Unexpected state reached within sealnote logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SealnoteError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    /// When the caller may retry. Only set for `ErrorKind::RateLimited`.
    pub reset_at: Option<DateTime<Utc>>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl SealnoteError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            reset_at: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            reset_at: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            reset_at: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            reset_at: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// A rate-limit rejection carrying the instant the window reopens.
    pub fn rate_limited(reset_at: DateTime<Utc>) -> Self {
        Self {
            category: ErrorCategory::User,
            kind: Some(ErrorKind::RateLimited),
            reset_at: Some(reset_at),
            source: None,
            msg: format!("rate limit exceeded; retry after {}", reset_at.to_rfc3339()),
        }
    }

    /// The undifferentiated failure for anything that went wrong opening a payload.
    pub fn crypto() -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::CryptoFailed,
            "corrupt input, tampered-with data, or bad passphrase",
        )
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// A short message safe to hand to an untrusted caller.
    ///
    /// Never includes input samples or the underlying cause.
    pub fn public_message(&self) -> &'static str {
        match self.kind {
            Some(ErrorKind::ValidationRejected) => "the request contains invalid input",
            Some(ErrorKind::RateLimited) => "too many requests; try again later",
            Some(ErrorKind::DecodeFailed | ErrorKind::CryptoFailed) => UNPROCESSABLE_MESSAGE,
            Some(ErrorKind::ConfigurationInvalid) => "service is misconfigured",
            Some(ErrorKind::DerivationTimeout) => "the request timed out",
            _ => "internal error",
        }
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        let reset_at = self.reset_at;
        Self {
            category,
            kind,
            reset_at,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SealnoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_preserves_kind_and_source() {
        let err = SealnoteError::crypto().with_context("failed to decrypt");
        assert_eq!(err.kind, Some(ErrorKind::CryptoFailed));
        assert_eq!(err.message(), "failed to decrypt");
        assert!(err.source_error().is_some());
    }

    #[test]
    fn decode_and_crypto_share_public_message() {
        let decode = SealnoteError::with_kind(
            ErrorCategory::User,
            ErrorKind::DecodeFailed,
            "envelope shorter than 28 bytes",
        );
        assert_eq!(decode.public_message(), SealnoteError::crypto().public_message());
        assert!(!decode.public_message().contains("28"));
    }

    #[test]
    fn rate_limited_carries_reset() {
        let at = Utc::now();
        let err = SealnoteError::rate_limited(at);
        assert_eq!(err.kind, Some(ErrorKind::RateLimited));
        assert_eq!(err.reset_at, Some(at));
    }
}
