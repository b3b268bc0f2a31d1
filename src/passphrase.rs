//! Passphrase reading functionality

use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};
use std::io::{self, IsTerminal, Read};
use zeroize::Zeroizing;

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read a passphrase as UTF-8 text
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// Prompt used when a command does not name its own.
pub const DEFAULT_PROMPT: &str = "Passphrase (sealnote): ";

/// Returns a fixed passphrase, e.g. one already held by the caller
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<String>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        Ok(self.passphrase.clone())
    }
}

/// Reads passphrase from any io::Read source
///
/// One trailing line ending (`\n` or `\r\n`) is removed, so `echo pass |`
/// and a passphrase file both behave as expected.
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            SealnoteError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        passphrase_text(data)
    }
}

/// Reads passphrase from the controlling terminal with no echo
///
/// Entry follows the same rules as [`ReaderPassphraseReader`], so a
/// passphrase typed here opens what one piped on stdin sealed.
pub struct TerminalPassphraseReader {
    prompt: &'static str,
}

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self::with_prompt(DEFAULT_PROMPT)
    }

    /// Show `prompt` instead of [`DEFAULT_PROMPT`], e.g. to tell a master
    /// passphrase apart from a sealing one.
    pub fn with_prompt(prompt: &'static str) -> Self {
        Self { prompt }
    }

    pub fn prompt(&self) -> &'static str {
        self.prompt
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        if !io::stdin().is_terminal() {
            return Err(SealnoteError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "stdin is not a terminal (pipe the passphrase with --passphrase-stdin)",
            ));
        }

        let typed = rpassword::prompt_password(self.prompt).map_err(|e| {
            SealnoteError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "no passphrase entered",
                e,
            )
        })?;
        passphrase_text(Zeroizing::new(typed.into_bytes()))
    }
}

/// Turn raw entered bytes into a passphrase: drop one trailing line ending
/// and require UTF-8. The input buffer is wiped either way.
fn passphrase_text(mut data: Zeroizing<Vec<u8>>) -> Result<Zeroizing<String>> {
    if data.ends_with(b"\n") {
        data.pop();
        if data.ends_with(b"\r") {
            data.pop();
        }
    }

    let text = std::str::from_utf8(&data).map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "passphrase is not valid UTF-8",
            e,
        )
    })?;
    Ok(Zeroizing::new(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_reader() {
        let mut reader = ConstantPassphraseReader::new("test123");
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "test123");
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "test123");
    }

    #[test]
    fn test_passphrase_text_rules() {
        let text = passphrase_text(Zeroizing::new(b"typed\r\n".to_vec())).unwrap();
        assert_eq!(text.as_str(), "typed");

        let text = passphrase_text(Zeroizing::new("pässwörd".as_bytes().to_vec())).unwrap();
        assert_eq!(text.as_str(), "pässwörd");

        let err = passphrase_text(Zeroizing::new(vec![0xc3])).expect_err("expected UTF-8 failure");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }

    #[test]
    fn test_terminal_prompt() {
        assert_eq!(TerminalPassphraseReader::new().prompt(), DEFAULT_PROMPT);
        let reader = TerminalPassphraseReader::with_prompt("Master passphrase: ");
        assert_eq!(reader.prompt(), "Master passphrase: ");
    }

    /// Tests the terminal reader. This is ignored by default and must be run
    /// explicitly and with human input:
    ///
    /// cargo test test_terminal_reader_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_reader_interactive() {
        let mut reader = TerminalPassphraseReader::new();
        println!("\nPlease enter a test passphrase:");
        let passphrase = reader.read_passphrase().unwrap();
        assert!(!passphrase.is_empty(), "Expected non-empty passphrase");
    }

    #[test]
    fn test_reader_passphrase_reader() {
        let data = b"mypassword";
        let mut reader = ReaderPassphraseReader::new(Box::new(&data[..]));
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "mypassword");
    }

    #[test]
    fn test_reader_strips_one_line_ending() {
        let mut reader = ReaderPassphraseReader::new(Box::new(&b"correct-horse\n"[..]));
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "correct-horse");

        let mut reader = ReaderPassphraseReader::new(Box::new(&b"correct-horse\r\n"[..]));
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "correct-horse");

        // Only the final line ending goes; inner whitespace is part of the secret.
        let mut reader = ReaderPassphraseReader::new(Box::new(&b" two words \n\n"[..]));
        assert_eq!(reader.read_passphrase().unwrap().as_str(), " two words \n");
    }

    #[test]
    fn test_reader_passphrase_reader_empty() {
        let mut reader = ReaderPassphraseReader::new(Box::new(&b""[..]));
        assert_eq!(reader.read_passphrase().unwrap().as_str(), "");
    }

    #[test]
    fn test_reader_rejects_non_utf8() {
        let data: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        let err = reader.read_passphrase().expect_err("expected UTF-8 failure");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }
}
