//! In-memory ledger store for testing.

use super::entry::LedgerEntry;
use super::traits::{LedgerStore, NumberedEntry};
use super::LedgerResult;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared in-memory entry list. Clones share the same entries, so several
/// daemons in one test see one ledger.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entries (for test assertions).
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn read_entries(&self) -> LedgerResult<Vec<NumberedEntry>> {
        Ok(self
            .lock()
            .iter()
            .enumerate()
            .map(|(index, entry)| NumberedEntry {
                line: index + 1,
                entry: entry.clone(),
            })
            .collect())
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        self.lock().push(entry.clone());
        Ok(())
    }

    async fn replace_entries(&self, entries: &[LedgerEntry]) -> LedgerResult<()> {
        *self.lock() = entries.to_vec();
        Ok(())
    }
}
