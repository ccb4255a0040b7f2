//! Journalseal CLI - client-side encryption of tasks and diary entries
//!
//! Manages the password-wrapped device keys and seals or opens records
//! in the form the CRUD layer stores them.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use journalseal::config::{ClientConfig, DEFAULT_STORE_DIR, KdfParams};
use journalseal::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use journalseal::keystore::FileKeyStore;
use journalseal::passphrase::{PasswordReader, ReaderPasswordReader, TerminalPasswordReader};
use journalseal::record::{EncryptedRecord, RecordKind};
use journalseal::session::{KeySession, LoginOutcome};

#[derive(Parser)]
#[command(name = "journalseal")]
#[command(version)]
#[command(about = "Client-side encryption for tasks and diary entries.", long_about = None)]
struct Cli {
    /// Directory holding the password-wrapped device keys
    #[arg(long, global = true, env = "JOURNALSEAL_STORE", default_value = DEFAULT_STORE_DIR)]
    store_dir: PathBuf,

    /// scrypt cost (log2 N) used when storing keys
    #[arg(long, global = true, env = "JOURNALSEAL_KDF_LOG_N", default_value_t = KdfParams::default().log_n)]
    kdf_log_n: u8,

    /// Read the password from the first line of stdin instead of from terminal
    #[arg(long, global = true)]
    password_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and store new device keys; prints the public key
    Register,

    /// Restore stored keys, or provision new ones on a fresh device
    Login,

    /// Remove stored keys from this device
    Logout,

    /// Print the public key of the stored keypair
    PublicKey,

    /// Encrypt a JSON object of plaintext fields read from stdin
    Seal {
        #[arg(short, long, value_enum)]
        kind: KindArg,
    },

    /// Decrypt an encrypted record, or an array of records, read from stdin
    Open {
        #[arg(short, long, value_enum)]
        kind: KindArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Task,
    Diary,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Task => RecordKind::Task,
            KindArg::Diary => RecordKind::DiaryEntry,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "journalseal=warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        store_dir: cli.store_dir,
        kdf: KdfParams {
            log_n: cli.kdf_log_n,
            ..KdfParams::default()
        },
    };

    if let Err(e) = run(cli.command, &config, cli.password_stdin) {
        eprintln!("Error: {}", e);
        let mut source = StdError::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}

fn run(command: Commands, config: &ClientConfig, password_stdin: bool) -> Result<()> {
    let mut session = config.open_session()?;

    match command {
        Commands::Register => {
            let password = get_password_reader(password_stdin).read_password()?;
            let public_key = session.register(&password)?;
            println!("{}", public_key);
        }
        Commands::Login => {
            let password = get_password_reader(password_stdin).read_password()?;
            match session.login(&password)? {
                LoginOutcome::Restored => println!("restored"),
                LoginOutcome::Provisioned { public_key } => {
                    println!("provisioned");
                    println!("{}", public_key);
                }
            }
        }
        Commands::Logout => session.logout()?,
        Commands::PublicKey => {
            restore(&mut session, password_stdin)?;
            println!("{}", session.export_public_key(None)?);
        }
        Commands::Seal { kind } => {
            restore(&mut session, password_stdin)?;
            let fields: BTreeMap<String, String> = parse_json(&read_stdin()?)?;
            let record = session.encrypt_record(kind.into(), &fields)?;
            print_json(&record)?;
        }
        Commands::Open { kind } => {
            restore(&mut session, password_stdin)?;
            let input: Value = parse_json(&read_stdin()?)?;
            if input.is_array() {
                let records: Vec<EncryptedRecord> = from_value(input)?;
                print_json(&session.decrypt_page(kind.into(), &records))?;
            } else {
                let record: EncryptedRecord = from_value(input)?;
                print_json(&session.decrypt_record(kind.into(), &record))?;
            }
        }
    }

    Ok(())
}

fn restore(session: &mut KeySession<FileKeyStore>, password_stdin: bool) -> Result<()> {
    let password = get_password_reader(password_stdin).read_password()?;
    if !session.restore_keys(&password)? {
        return Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::MissingKey,
            format!(
                "no stored keys in {}; run register or login first",
                session.store().dir().display()
            ),
        ));
    }
    Ok(())
}

fn get_password_reader(use_stdin: bool) -> Box<dyn PasswordReader> {
    if use_stdin {
        Box::new(ReaderPasswordReader::new(io::stdin()))
    } else {
        Box::new(TerminalPasswordReader::new())
    }
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("error reading stdin: {}", e),
            e,
        )
    })?;
    Ok(input)
}

fn parse_json<T: serde::de::DeserializeOwned>(input: &str) -> Result<T> {
    serde_json::from_str(input).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Deserialization,
            format!("invalid JSON on stdin: {}", e),
            e,
        )
    })
}

fn from_value<T: serde::de::DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Deserialization,
            format!("input is not an encrypted record: {}", e),
            e,
        )
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Serialization,
            format!("failed to render output: {}", e),
            e,
        )
    })?;
    println!("{}", rendered);
    Ok(())
}
