//! Guards for untrusted text
//!
//! Each check is a pure predicate that returns a [`Verdict`] instead of an
//! error; rejecting input is the expected outcome, not a failure. The only
//! side effect is an audit record (see `crate::audit`) per rejection.
//!
//! [`check_all`] runs the checks that fit a [`ValueContext`], which is how
//! the boundary layer uses this module. The individual `check_*` functions
//! are available for values with unusual destinations.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::audit::{AuditRecord, Sensitivity, Severity};
use crate::base91;
use crate::envelope::MIN_ENVELOPE_LEN;
use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};

/// Largest accepted message, in bytes
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Largest accepted passphrase, in bytes
pub const MAX_PASSPHRASE_BYTES: usize = 1024;

/// Largest accepted label or identity, in bytes
pub const MAX_LABEL_BYTES: usize = 256;

/// Machine-readable rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Empty,
    TooLarge,
    ControlCharacter,
    DangerousToken,
    ShellMetacharacter,
    SqlPattern,
    PathTraversal,
    EncodedTraversal,
    AbsolutePath,
    InvalidHex,
    OddLength,
    InvalidPayload,
    InvalidUrl,
    DisallowedScheme,
    CredentialsInUrl,
    BlockedHost,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::TooLarge => "too_large",
            RejectReason::ControlCharacter => "control_character",
            RejectReason::DangerousToken => "dangerous_token",
            RejectReason::ShellMetacharacter => "shell_metacharacter",
            RejectReason::SqlPattern => "sql_pattern",
            RejectReason::PathTraversal => "path_traversal",
            RejectReason::EncodedTraversal => "encoded_traversal",
            RejectReason::AbsolutePath => "absolute_path",
            RejectReason::InvalidHex => "invalid_hex",
            RejectReason::OddLength => "odd_length",
            RejectReason::InvalidPayload => "invalid_payload",
            RejectReason::InvalidUrl => "invalid_url",
            RejectReason::DisallowedScheme => "disallowed_scheme",
            RejectReason::CredentialsInUrl => "credentials_in_url",
            RejectReason::BlockedHost => "blocked_host",
        }
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject {
        reason: RejectReason,
        severity: Severity,
    },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn is_reject(&self) -> bool {
        !self.is_pass()
    }

    /// Turn a rejection into a `ValidationRejected` error for `?` chains.
    ///
    /// The message names the field and the reason code only; the audit
    /// record holds everything else.
    pub fn into_result(self, field: &str) -> Result<()> {
        match self {
            Verdict::Pass => Ok(()),
            Verdict::Reject { reason, .. } => Err(SealnoteError::with_kind(
                ErrorCategory::User,
                ErrorKind::ValidationRejected,
                format!("{} rejected ({})", field, reason.code()),
            )),
        }
    }
}

/// Where a value is headed, which decides the checks it must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueContext {
    /// Plaintext about to be sealed. Opaque to us, so only its size matters.
    Message,
    Passphrase,
    /// Encoded envelope text.
    Payload,
    Hex,
    /// Free text that will be rendered somewhere.
    Text,
    /// Site label for password derivation.
    Label,
    /// Caller identity used as a rate-limit key.
    Identity,
    Command,
    Query,
    Path,
    Url,
}

impl ValueContext {
    fn sensitivity(self) -> Sensitivity {
        match self {
            ValueContext::Message | ValueContext::Passphrase => Sensitivity::Secret,
            _ => Sensitivity::Sampled,
        }
    }

    fn checks(self) -> &'static [Check] {
        match self {
            ValueContext::Message => MESSAGE_CHECKS,
            ValueContext::Passphrase => PASSPHRASE_CHECKS,
            ValueContext::Payload => PAYLOAD_CHECKS,
            ValueContext::Hex => HEX_CHECKS,
            ValueContext::Text => TEXT_CHECKS,
            ValueContext::Label | ValueContext::Identity => LABEL_CHECKS,
            ValueContext::Command => COMMAND_CHECKS,
            ValueContext::Query => QUERY_CHECKS,
            ValueContext::Path => PATH_CHECKS,
            ValueContext::Url => URL_CHECKS,
        }
    }
}

type Detector = fn(&str) -> Option<Finding>;

/// A named detector; the name ends up in audit records.
type Check = (&'static str, Detector);

const MESSAGE_CHECKS: &[Check] = &[("message_size", detect_message_size)];
const PASSPHRASE_CHECKS: &[Check] = &[("passphrase", detect_passphrase)];
const PAYLOAD_CHECKS: &[Check] = &[("payload", detect_payload)];
const HEX_CHECKS: &[Check] = &[("hex", detect_hex)];
const TEXT_CHECKS: &[Check] = &[
    ("message_size", detect_message_size),
    ("dangerous_tokens", detect_dangerous_tokens),
];
const LABEL_CHECKS: &[Check] = &[
    ("label", detect_label),
    ("dangerous_tokens", detect_dangerous_tokens),
];
const COMMAND_CHECKS: &[Check] = &[
    ("dangerous_tokens", detect_dangerous_tokens),
    ("shell", detect_shell),
];
const QUERY_CHECKS: &[Check] = &[("sql", detect_sql)];
const PATH_CHECKS: &[Check] = &[("path", detect_path)];
const URL_CHECKS: &[Check] = &[("url", detect_url)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Finding {
    reason: RejectReason,
    severity: Severity,
}

fn finding(reason: RejectReason, severity: Severity) -> Option<Finding> {
    Some(Finding { reason, severity })
}

/// Run every check that applies to `context`, stopping at the first rejection.
pub fn check_all(context: ValueContext, value: &str) -> Verdict {
    for &(check, detector) in context.checks() {
        let verdict = report(check, context.sensitivity(), value, detector(value));
        if verdict.is_reject() {
            return verdict;
        }
    }
    Verdict::Pass
}

pub fn check_message_size(message: &str) -> Verdict {
    report("message_size", Sensitivity::Secret, message, detect_message_size(message))
}

pub fn check_passphrase(passphrase: &str) -> Verdict {
    report("passphrase", Sensitivity::Secret, passphrase, detect_passphrase(passphrase))
}

pub fn check_dangerous_tokens(value: &str) -> Verdict {
    report("dangerous_tokens", Sensitivity::Sampled, value, detect_dangerous_tokens(value))
}

pub fn check_shell(value: &str) -> Verdict {
    report("shell", Sensitivity::Sampled, value, detect_shell(value))
}

pub fn check_sql(value: &str) -> Verdict {
    report("sql", Sensitivity::Sampled, value, detect_sql(value))
}

pub fn check_path(value: &str) -> Verdict {
    report("path", Sensitivity::Sampled, value, detect_path(value))
}

pub fn check_hex(value: &str) -> Verdict {
    report("hex", Sensitivity::Sampled, value, detect_hex(value))
}

pub fn check_payload(value: &str) -> Verdict {
    report("payload", Sensitivity::Sampled, value, detect_payload(value))
}

pub fn check_url(value: &str) -> Verdict {
    report("url", Sensitivity::Sampled, value, detect_url(value))
}

fn report(
    check: &'static str,
    sensitivity: Sensitivity,
    value: &str,
    finding: Option<Finding>,
) -> Verdict {
    match finding {
        None => Verdict::Pass,
        Some(Finding { reason, severity }) => {
            AuditRecord::new(check, reason, severity, sensitivity, value).emit();
            Verdict::Reject { reason, severity }
        }
    }
}

fn detect_message_size(value: &str) -> Option<Finding> {
    if value.len() > MAX_MESSAGE_BYTES {
        return finding(RejectReason::TooLarge, Severity::Notice);
    }
    None
}

fn detect_passphrase(value: &str) -> Option<Finding> {
    if value.is_empty() {
        return finding(RejectReason::Empty, Severity::Low);
    }
    if value.len() > MAX_PASSPHRASE_BYTES {
        return finding(RejectReason::TooLarge, Severity::Notice);
    }
    None
}

fn detect_label(value: &str) -> Option<Finding> {
    if value.is_empty() {
        return finding(RejectReason::Empty, Severity::Low);
    }
    if value.len() > MAX_LABEL_BYTES {
        return finding(RejectReason::TooLarge, Severity::Notice);
    }
    if value.chars().any(char::is_control) {
        return finding(RejectReason::ControlCharacter, Severity::Medium);
    }
    None
}

/// Matched after lowercasing and removing all whitespace.
const DANGEROUS_TOKENS: &[&str] = &[
    "eval(",
    "function(",
    "settimeout(",
    "setinterval(",
    "import(",
    "require(",
    "expression(",
    "<script",
    "</script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "document.cookie",
    "document.write",
    ".innerhtml",
    "__proto__",
    "constructor.prototype",
];

fn detect_dangerous_tokens(value: &str) -> Option<Finding> {
    let squashed: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    if DANGEROUS_TOKENS.iter().any(|t| squashed.contains(t)) {
        return finding(RejectReason::DangerousToken, Severity::High);
    }
    if has_event_handler(&value.to_ascii_lowercase()) {
        return finding(RejectReason::DangerousToken, Severity::High);
    }
    None
}

/// Looks for inline handlers such as `onerror=` or `onload =`: a word
/// starting with `on`, at least three more letters, then `=`.
fn has_event_handler(lower: &str) -> bool {
    let bytes = lower.as_bytes();
    let mut i = 0;

    while i + 2 <= bytes.len() {
        let at_word_start = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if at_word_start && &bytes[i..i + 2] == b"on" {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                j += 1;
            }
            let letters = j - (i + 2);
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if letters >= 3 && j < bytes.len() && bytes[j] == b'=' {
                return true;
            }
        }
        i += 1;
    }

    false
}

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '\'', '"', '\n', '\r', '\0',
];

fn detect_shell(value: &str) -> Option<Finding> {
    if value.contains(SHELL_METACHARACTERS) {
        return finding(RejectReason::ShellMetacharacter, Severity::High);
    }
    None
}

/// Patterns that only show up in an attack, matched after lowercasing and
/// collapsing whitespace runs to one space.
const SQL_CRITICAL: &[&str] = &[
    "drop table",
    "drop database",
    "truncate table",
    "delete from",
    "; shutdown",
    "xp_",
    "sp_executesql",
];

const SQL_SUSPICIOUS: &[&str] = &[
    "' or ",
    "' and ",
    "';",
    "' --",
    "--",
    "/*",
    "*/",
    "union select",
    "union all select",
    "insert into",
    "alter table",
    "exec(",
    "execute(",
    "sleep(",
    "benchmark(",
    "waitfor delay",
    " or 1=1",
];

fn detect_sql(value: &str) -> Option<Finding> {
    let normalized = value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if SQL_CRITICAL.iter().any(|p| normalized.contains(p)) {
        return finding(RejectReason::SqlPattern, Severity::Critical);
    }
    if SQL_SUSPICIOUS.iter().any(|p| normalized.contains(p)) {
        return finding(RejectReason::SqlPattern, Severity::High);
    }
    if let Some(at) = normalized.find("update ") {
        if normalized[at..].contains(" set ") {
            return finding(RejectReason::SqlPattern, Severity::High);
        }
    }
    None
}

/// Percent-encoded dots, separators and overlong UTF-8 forms of them.
const ENCODED_TRAVERSAL: &[&str] = &[
    "%2e", "%2f", "%5c", "%25", "%c0", "%c1", "%e0%80", "%u002e", "%u2215", "\\u002e",
];

fn detect_path(value: &str) -> Option<Finding> {
    if value.is_empty() {
        return finding(RejectReason::Empty, Severity::Low);
    }
    if value.contains('\0') {
        return finding(RejectReason::PathTraversal, Severity::Critical);
    }

    let lower = value.to_ascii_lowercase();
    if ENCODED_TRAVERSAL.iter().any(|e| lower.contains(e)) {
        return finding(RejectReason::EncodedTraversal, Severity::Critical);
    }

    let dots_only = |segment: &str| segment.len() >= 2 && segment.chars().all(|c| c == '.');
    if value.split(['/', '\\']).any(dots_only) {
        return finding(RejectReason::PathTraversal, Severity::High);
    }

    let bytes = value.as_bytes();
    let is_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if value.starts_with(['/', '\\', '~']) || is_drive {
        return finding(RejectReason::AbsolutePath, Severity::Medium);
    }
    None
}

fn detect_hex(value: &str) -> Option<Finding> {
    if value.is_empty() {
        return finding(RejectReason::Empty, Severity::Low);
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return finding(RejectReason::InvalidHex, Severity::Notice);
    }
    if value.len() % 2 != 0 {
        return finding(RejectReason::OddLength, Severity::Notice);
    }
    None
}

/// Longest payload an in-bounds message can produce.
fn max_payload_chars() -> usize {
    base91::encoded_len_bound(MAX_MESSAGE_BYTES + MIN_ENVELOPE_LEN)
}

fn detect_payload(value: &str) -> Option<Finding> {
    if value.is_empty() {
        return finding(RejectReason::Empty, Severity::Low);
    }
    if value.len() > max_payload_chars() {
        return finding(RejectReason::TooLarge, Severity::Notice);
    }
    if !value.chars().all(base91::is_alphabet_symbol) {
        return finding(RejectReason::InvalidPayload, Severity::Notice);
    }
    None
}

const SCRIPTABLE_SCHEMES: &[&str] = &["javascript", "data", "vbscript", "file"];

const BLOCKED_DOMAIN_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

fn detect_url(value: &str) -> Option<Finding> {
    let url = match Url::parse(value.trim()) {
        Ok(url) => url,
        Err(_) => return finding(RejectReason::InvalidUrl, Severity::Notice),
    };

    let scheme = url.scheme();
    if SCRIPTABLE_SCHEMES.contains(&scheme) {
        return finding(RejectReason::DisallowedScheme, Severity::High);
    }
    if scheme != "https" {
        return finding(RejectReason::DisallowedScheme, Severity::Notice);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return finding(RejectReason::CredentialsInUrl, Severity::Medium);
    }

    let blocked = match url.host() {
        None => return finding(RejectReason::InvalidUrl, Severity::Notice),
        Some(Host::Domain(domain)) => is_blocked_domain(domain),
        Some(Host::Ipv4(ip)) => is_blocked_ipv4(ip),
        Some(Host::Ipv6(ip)) => is_blocked_ipv6(ip),
    };
    if blocked {
        return finding(RejectReason::BlockedHost, Severity::Critical);
    }
    None
}

fn is_blocked_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost" || BLOCKED_DOMAIN_SUFFIXES.iter().any(|s| domain.ends_with(s))
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (b & 0xC0) == 64)
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xFE00) == 0xFC00
        // fe80::/10 link local
        || (first & 0xFFC0) == 0xFE80
}
