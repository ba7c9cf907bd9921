//! Dead letter queue for unparseable payloads.
//!
//! Append-only local file. Each entry is a timestamped reason line followed
//! by the raw Kafka payload, length-prefixed so the original bytes can be
//! recovered exactly. Writes are serialized by a mutex and flushed
//! immediately, so entries from one writer never interleave.

use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Entry separator written after each payload.
const ENTRY_SEPARATOR: &[u8] = b"\n---\n";

/// Append-only dead letter file.
pub struct DeadLetterQueue {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl DeadLetterQueue {
    /// Open (or create) the dead letter file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        info!(path = %path.display(), "Dead letter queue opened");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one rejected payload with the reason it was rejected.
    pub fn write(&self, payload: &[u8], reason: &str) -> Result<()> {
        let mut file = self.file.lock();

        writeln!(
            file,
            "[{}] ERROR: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            reason
        )?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;
        file.write_all(ENTRY_SEPARATOR)?;
        file.flush()?;

        Ok(())
    }

    /// Path of the dead letter file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
