//! Sealnote - Passphrase-sealed text tokens using PBKDF2, AES-256-GCM and base91

#![forbid(unsafe_code)]

pub mod audit;
pub mod base91;
pub mod boundary;
pub mod config;
pub mod envelope;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod passphrase;
pub mod ratelimit;
pub mod validate;

pub use boundary::Sealer;
pub use config::Config;
pub use error::{ErrorCategory, ErrorKind, Result, SealnoteError};
