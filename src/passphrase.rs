//! Password acquisition for the command-line front-end

use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use std::io::{self, IsTerminal, Read, Write};
use zeroize::Zeroizing;

/// Source of the account password used to wrap and unwrap stored keys
pub trait PasswordReader {
    /// Read a password as arbitrary bytes (not necessarily UTF-8)
    ///
    /// Returns the password wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_password(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Returns a fixed password (for testing)
pub struct ConstantPasswordReader {
    password: Zeroizing<Vec<u8>>,
}

impl ConstantPasswordReader {
    pub fn new(password: Vec<u8>) -> Self {
        Self {
            password: Zeroizing::new(password),
        }
    }
}

impl PasswordReader for ConstantPasswordReader {
    fn read_password(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.password).clone()))
    }
}

/// Reads the password from any io::Read source, up to the first newline
///
/// Only the first line is taken so that `--password-stdin` composes with
/// commands that read a record from the rest of stdin.
pub struct ReaderPasswordReader<R> {
    reader: R,
}

impl<R: Read> ReaderPasswordReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> PasswordReader for ReaderPasswordReader<R> {
    fn read_password(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        let mut byte = [0u8; 1];
        loop {
            let n = self.reader.read(&mut byte).map_err(|e| {
                JournalsealError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("error reading password: {}", e),
                    e,
                )
            })?;
            if n == 0 || byte[0] == b'\n' {
                break;
            }
            data.push(byte[0]);
        }
        if data.last() == Some(&b'\r') {
            data.pop();
        }
        Ok(data)
    }
}

/// Reads password from terminal with no echo
#[derive(Default)]
pub struct TerminalPasswordReader;

impl TerminalPasswordReader {
    pub fn new() -> Self {
        Self
    }
}

impl PasswordReader for TerminalPasswordReader {
    /// Read password from terminal.
    ///
    /// Note: Terminal input is limited to UTF-8 due to rpassword library constraints.
    /// For non-UTF-8 passwords, use --password-stdin instead.
    fn read_password(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read password from terminal - stdin is not a terminal",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(b"Password (journalseal): ")
            .and_then(|()| stderr.flush())
            .map_err(|e| {
                JournalsealError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        // rpassword returns String (UTF-8 only), not zeroized
        let password = rpassword::read_password().map_err(|e| {
            JournalsealError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading password: {}", e),
                e,
            )
        })?;

        Ok(Zeroizing::new(password.into_bytes()))
    }
}
