//! File encryption/decryption operations
//!
//! This module provides the file-level operations behind the `sealnote`
//! command: read a message or payload, run it through the validators and
//! the envelope, and write the result without ever leaving a partial file.

use crate::envelope;
use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};
use crate::kdf::Salt;
use crate::passphrase::PassphraseReader;
use crate::validate::{self, ValueContext};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Seal a text file with a passphrase
///
/// Reads a UTF-8 message from `input_path`, seals it under a passphrase from
/// `passphrase_reader` and writes the payload to `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    salt: &Salt,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let message = read_text(input_path)?;
    validate::check_all(ValueContext::Message, &message).into_result("message")?;

    let passphrase = passphrase_reader.read_passphrase()?;
    validate::check_all(ValueContext::Passphrase, &passphrase).into_result("passphrase")?;

    let payload = envelope::seal(passphrase.as_bytes(), salt, message.as_bytes())
        .map_err(|e| e.with_context("encryption failed"))?;
    write_file_secure(output_path, payload.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    debug!(output = %output_path.display(), "wrote payload");
    Ok(())
}

/// Open a payload file with a passphrase
///
/// Reads a payload from `input_path` (surrounding whitespace is ignored),
/// opens it with a passphrase from `passphrase_reader` and writes the message
/// to `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    salt: &Salt,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let contents = read_text(input_path)?;
    let payload = contents.trim();
    validate::check_all(ValueContext::Payload, payload).into_result("payload")?;

    let passphrase = passphrase_reader.read_passphrase()?;
    validate::check_all(ValueContext::Passphrase, &passphrase).into_result("passphrase")?;

    let message = envelope::open_text(passphrase.as_bytes(), salt, payload)
        .map_err(|e| e.with_context("failed to decrypt"))?;
    write_file_secure(output_path, message.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    debug!(output = %output_path.display(), "wrote message");
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not valid UTF-8", path.display()),
            e,
        )
    })
}

/// Write file atomically with secure permissions (0o600 on Unix)
///
/// Contents go to a temporary file in the target directory, which is synced
/// and then renamed over `path`. Either the old file or the complete new one
/// exists at every point.
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to create temporary file in {}", dir.display()),
            e,
        )
    })?;

    // NamedTempFile already creates files as 0o600 on Unix; make it explicit.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error("failed to set temporary file permissions", e))?;
    }

    temp_file
        .write_all(contents)
        .map_err(|e| io_error(format!("failed to write {}", path.display()), e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_error("failed to flush temporary file", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_error("failed to sync file prior to rename", e))?;

    temp_file.persist(path).map_err(|e| {
        SealnoteError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn io_error(msg: impl Into<String>, err: io::Error) -> SealnoteError {
    SealnoteError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

fn read_error(path: &Path, err: io::Error) -> SealnoteError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    SealnoteError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::ConstantPassphraseReader;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn salt() -> Salt {
        Salt::from_hex("8f3c1d2a9b7e4f60a1b2c3d4e5f60718").unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.sealed");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        let plaintext = "Hello, sealnote!";
        fs::write(&plain_path, plaintext).unwrap();

        let mut reader = ConstantPassphraseReader::new("test password");
        encrypt_file(&plain_path, &crypt_path, &salt(), &mut reader).unwrap();
        let payload = fs::read_to_string(&crypt_path).unwrap();
        assert!(payload.chars().all(crate::base91::is_alphabet_symbol));

        let mut reader = ConstantPassphraseReader::new("test password");
        decrypt_file(&crypt_path, &decrypted_path, &salt(), &mut reader).unwrap();
        assert_eq!(fs::read_to_string(&decrypted_path).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_ignores_surrounding_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let crypt_path = temp_dir.path().join("pasted.sealed");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        let payload = envelope::seal(b"test", &salt(), b"pasted").unwrap();
        fs::write(&crypt_path, format!("\n  {}\r\n", payload)).unwrap();

        let mut reader = ConstantPassphraseReader::new("test");
        decrypt_file(&crypt_path, &decrypted_path, &salt(), &mut reader).unwrap();
        assert_eq!(fs::read_to_string(&decrypted_path).unwrap(), "pasted");
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.sealed");

        fs::write(&plain_path, b"test").unwrap();

        let mut reader = ConstantPassphraseReader::new("test");
        encrypt_file(&plain_path, &crypt_path, &salt(), &mut reader).unwrap();

        let metadata = fs::metadata(&crypt_path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_decrypt_wrong_passphrase_leaves_no_output() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.sealed");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"secret").unwrap();

        let mut reader = ConstantPassphraseReader::new("correct");
        encrypt_file(&plain_path, &crypt_path, &salt(), &mut reader).unwrap();

        let mut reader = ConstantPassphraseReader::new("wrong");
        let err = decrypt_file(&crypt_path, &decrypted_path, &salt(), &mut reader)
            .expect_err("expected authentication failure");

        assert_eq!(err.kind, Some(ErrorKind::CryptoFailed));
        assert!(!decrypted_path.exists());
    }

    #[test]
    fn test_existing_output_survives_failure() {
        let temp_dir = TempDir::new().unwrap();
        let crypt_path = temp_dir.path().join("garbage.sealed");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&crypt_path, "not a payload").unwrap();
        fs::write(&decrypted_path, "previous contents").unwrap();

        let mut reader = ConstantPassphraseReader::new("test");
        let err = decrypt_file(&crypt_path, &decrypted_path, &salt(), &mut reader)
            .expect_err("expected rejection");

        assert_eq!(err.kind, Some(ErrorKind::ValidationRejected));
        assert_eq!(fs::read_to_string(&decrypted_path).unwrap(), "previous contents");
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("empty.txt");
        let crypt_path = temp_dir.path().join("empty.txt.sealed");
        let decrypted_path = temp_dir.path().join("decrypted.txt");

        fs::write(&plain_path, b"").unwrap();

        let mut reader = ConstantPassphraseReader::new("test");
        encrypt_file(&plain_path, &crypt_path, &salt(), &mut reader).unwrap();

        let mut reader = ConstantPassphraseReader::new("test");
        decrypt_file(&crypt_path, &decrypted_path, &salt(), &mut reader).unwrap();

        assert_eq!(fs::read(&decrypted_path).unwrap(), b"");
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.sealed");
        fs::write(&plain_path, b"hi").unwrap();

        let mut reader = ConstantPassphraseReader::new("");
        let err = encrypt_file(&plain_path, &crypt_path, &salt(), &mut reader)
            .expect_err("expected rejection");
        assert_eq!(err.kind, Some(ErrorKind::ValidationRejected));
        assert!(!crypt_path.exists());
    }

    #[test]
    fn test_missing_input_is_user_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut reader = ConstantPassphraseReader::new("test");
        let err = encrypt_file(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("out"),
            &salt(),
            &mut reader,
        )
        .expect_err("expected read failure");
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(err.kind, Some(ErrorKind::Io));
    }
}
