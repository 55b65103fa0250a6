//! JSON-lines ledger file.
//!
//! Every daemon opens the file in append mode and writes whole lines with a
//! single write, so entries from independent processes interleave but never
//! overwrite each other. Lines are capped at [`MAX_ENTRY_BYTES`] so one
//! append is one `write(2)`.
//!
//! A failed append can leave a fragment without a newline. The next append
//! terminates it first, and readers skip such fragments as torn writes.
//! Readers also skip a trailing line that has no newline yet (a write still
//! in flight). Only complete JSON that fails to decode counts as corruption.

use super::entry::LedgerEntry;
use super::traits::{LedgerStore, NumberedEntry};
use super::{LedgerError, LedgerResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Largest encoded entry, newline included.
pub const MAX_ENTRY_BYTES: usize = 16 * 1024;

/// Ledger backed by a `.jsonl` file.
#[derive(Debug, Clone)]
pub struct JsonlLedgerStore {
    path: PathBuf,
}

impl JsonlLedgerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_parent(&self) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

/// Encode one entry as a newline-terminated line.
pub fn encode_line(entry: &LedgerEntry) -> LedgerResult<String> {
    let mut line =
        serde_json::to_string(entry).map_err(|e| LedgerError::Encode(e.to_string()))?;
    line.push('\n');
    if line.len() > MAX_ENTRY_BYTES {
        return Err(LedgerError::EntryTooLarge {
            size: line.len(),
            limit: MAX_ENTRY_BYTES,
        });
    }
    Ok(line)
}

/// Parse ledger file contents.
pub fn parse_lines(contents: &str) -> LedgerResult<Vec<NumberedEntry>> {
    let mut entries = Vec::new();

    for (index, raw) in contents.split_inclusive('\n').enumerate() {
        let line = index + 1;

        if !raw.ends_with('\n') {
            debug!(line, "skipping partially written ledger line");
            break;
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: LedgerEntry = match serde_json::from_str(trimmed) {
            Ok(entry) => entry,
            // JSON cut short: an append that failed partway.
            Err(e) if e.is_eof() => {
                warn!(line, "Skipping torn ledger line");
                continue;
            }
            Err(e) => {
                return Err(LedgerError::Corrupt {
                    line,
                    reason: e.to_string(),
                })
            }
        };
        entries.push(NumberedEntry { line, entry });
    }

    Ok(entries)
}

#[async_trait]
impl LedgerStore for JsonlLedgerStore {
    async fn read_entries(&self) -> LedgerResult<Vec<NumberedEntry>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => parse_lines(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        let mut line = encode_line(entry)?;
        self.ensure_parent().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        // Terminate a torn fragment so it cannot swallow this entry.
        if file.metadata().await?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).await?;
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!(path = %self.path.display(), "Ledger ends in a torn line, terminating it");
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    async fn replace_entries(&self, entries: &[LedgerEntry]) -> LedgerResult<()> {
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&encode_line(entry)?);
        }

        self.ensure_parent().await?;
        let temp = self.temp_path();
        fs::write(&temp, contents.as_bytes()).await?;
        fs::rename(&temp, &self.path).await?;

        Ok(())
    }
}
