//! Sealnote CLI - Passphrase-sealed text tokens
//!
//! Command-line interface for sealing and opening messages using
//! AES-256-GCM with PBKDF2-HMAC-SHA512 key derivation and base91 payloads.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use sealnote::config::ENV_SALT;
use sealnote::file_ops;
use sealnote::kdf::{self, SITE_PASSWORD_DEFAULT_LEN, Salt};
use sealnote::passphrase::{
    DEFAULT_PROMPT, PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader,
};
use sealnote::validate::{self, ValueContext};

#[derive(Parser)]
#[command(name = "sealnote")]
#[command(version)]
#[command(about = "Passphrase-sealed text tokens.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Deployment salt, 32 hex characters
    #[arg(long, global = true, env = "SEALNOTE_SALT", hide_env_values = true)]
    salt: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal the message in a file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be sealed
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the payload to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Open the payload in a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the file holding the payload
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the message to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Print a reproducible password for a site or service label
    DerivePassword {
        /// Site or service the password is for, e.g. example.com
        #[arg(short, long)]
        label: String,

        /// Number of characters, 8 to 43
        #[arg(long, default_value_t = SITE_PASSWORD_DEFAULT_LEN)]
        length: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sealnote=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", describe(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> sealnote::Result<()> {
    let salt = Salt::from_hex(cli.salt.as_deref().unwrap_or_default())
        .map_err(|e| e.with_context(format!("a salt is required (--salt or {})", ENV_SALT)))?;
    let prompt = match cli.command {
        Commands::DerivePassword { .. } => "Master passphrase (sealnote): ",
        _ => DEFAULT_PROMPT,
    };
    let mut reader = get_passphrase_reader(cli.passphrase_stdin, prompt);

    match cli.command {
        Commands::Encrypt { input, output } => {
            file_ops::encrypt_file(&input, &output, &salt, &mut *reader)
        }
        Commands::Decrypt { input, output } => {
            file_ops::decrypt_file(&input, &output, &salt, &mut *reader)
        }
        Commands::DerivePassword { label, length } => {
            validate::check_all(ValueContext::Label, &label).into_result("label")?;
            let master = reader.read_passphrase()?;
            validate::check_all(ValueContext::Passphrase, &master).into_result("passphrase")?;
            let password = kdf::derive_site_password(master.as_bytes(), &label, &salt, length)?;
            println!("{}", password.as_str());
            Ok(())
        }
    }
}

/// The error message followed by each underlying cause.
fn describe(err: &sealnote::SealnoteError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn get_passphrase_reader(use_stdin: bool, prompt: &'static str) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::with_prompt(prompt))
    }
}
