//! Hook for files wrapped in the encrypted CLE container.
//!
//! The container format is not handled here; a [`Decrypt`] implementation
//! turns the raw file into a plain `#scp` buffer.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::disasm::header::check_magic;
use crate::error::{Ed9Error, Result};

pub trait Decrypt: Send + Sync {
    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Used when no hook is configured: anything without the magic is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecrypt;

impl Decrypt for NoDecrypt {
    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        check_magic(bytes)?;
        Ok(bytes.to_vec())
    }
}

/// Pipes the file through an external program: raw bytes on stdin, the
/// decrypted script on stdout.
#[derive(Debug, Clone)]
pub struct CommandDecrypt {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDecrypt {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Decrypt for CommandDecrypt {
    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // feed stdin while stdout drains
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Ed9Error::Decrypt("child stdin unavailable".into()))?;
        let input = bytes.to_vec();
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| Ed9Error::Decrypt("stdin writer panicked".into()))?;

        if !output.status.success() {
            return Err(Ed9Error::Decrypt(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written?;
        Ok(output.stdout)
    }
}
