//! Structured audit records for rejected input
//!
//! Every validator rejection produces one [`AuditRecord`], emitted as a
//! `tracing` event on the `sealnote::audit` target. Records never carry a
//! full input value: at most a short, single-line sample, and nothing but
//! a byte count for secrets.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::validate::RejectReason;

/// Tracing target for audit events, so subscribers can route them apart.
pub const AUDIT_TARGET: &str = "sealnote::audit";

/// Longest sample kept from an offending value, in characters.
pub const SAMPLE_CHARS: usize = 32;

/// How bad a rejection looks, 1 (noise) to 5 (clear attack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low = 1,
    Notice = 2,
    Medium = 3,
    High = 4,
    Critical = 5,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Whether a value may be sampled into the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    /// Sample up to [`SAMPLE_CHARS`] characters.
    Sampled,
    /// Record only the length.
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Name of the check that rejected the value.
    pub check: &'static str,
    pub reason: RejectReason,
    pub severity: Severity,
    pub sample: String,
}

impl AuditRecord {
    pub fn new(
        check: &'static str,
        reason: RejectReason,
        severity: Severity,
        sensitivity: Sensitivity,
        value: &str,
    ) -> Self {
        let sample = match sensitivity {
            Sensitivity::Sampled => sample(value),
            Sensitivity::Secret => format!("<redacted, {} bytes>", value.len()),
        };
        Self {
            timestamp: Utc::now(),
            check,
            reason,
            severity,
            sample,
        }
    }

    /// Write the record to the audit log.
    pub fn emit(&self) {
        warn!(
            target: AUDIT_TARGET,
            timestamp = %self.timestamp.to_rfc3339(),
            check = self.check,
            reason = self.reason.code(),
            severity = self.severity.level(),
            sample = %self.sample,
            "input rejected"
        );
    }
}

/// Cut a value down to a log-safe sample.
///
/// Line breaks are dropped so a sample can never forge extra log lines;
/// other control characters become `?`. Long values end in `…`.
pub fn sample(value: &str) -> String {
    let mut out = String::with_capacity(SAMPLE_CHARS + 3);
    let mut kept = 0;

    for c in value.chars().filter(|c| *c != '\n' && *c != '\r') {
        if kept == SAMPLE_CHARS {
            out.push('…');
            return out;
        }
        out.push(if c.is_control() { '?' } else { c });
        kept += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_strips_newlines() {
        assert_eq!(sample("line one\nline two\r\n"), "line oneline two");
    }

    #[test]
    fn test_sample_replaces_controls() {
        assert_eq!(sample("a\tb\0c\x1b[31m"), "a?b?c?[31m");
    }

    #[test]
    fn test_sample_truncates() {
        let value = "x".repeat(100);
        let s = sample(&value);
        assert_eq!(s.chars().count(), SAMPLE_CHARS + 1);
        assert!(s.ends_with('…'));

        let exact = "y".repeat(SAMPLE_CHARS);
        assert_eq!(sample(&exact), exact);
    }

    #[test]
    fn test_sample_counts_characters_not_bytes() {
        let value = "é".repeat(40);
        let s = sample(&value);
        assert_eq!(s.chars().count(), SAMPLE_CHARS + 1);
    }

    #[test]
    fn test_secret_is_never_sampled() {
        let record = AuditRecord::new(
            "passphrase",
            RejectReason::TooLarge,
            Severity::Notice,
            Sensitivity::Secret,
            "hunter2hunter2",
        );
        assert_eq!(record.sample, "<redacted, 14 bytes>");
        assert!(!record.sample.contains("hunter2"));
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(Severity::Low.level(), 1);
        assert_eq!(Severity::Critical.level(), 5);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::Medium.to_string(), "3");
    }
}
