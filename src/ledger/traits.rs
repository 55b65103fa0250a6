//! Storage abstraction for the shared ledger.
//!
//! Enables an in-memory store for unit tests and a JSON-lines file store for
//! deployments where every participant daemon shares one ledger file.

use super::entry::LedgerEntry;
use super::LedgerResult;
use async_trait::async_trait;

/// A ledger entry together with its 1-based position in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedEntry {
    pub line: usize,
    pub entry: LedgerEntry,
}

/// Append-only entry storage.
///
/// `append_entry` must be atomic with respect to concurrent appenders:
/// an entry is either fully visible to readers or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read every committed entry, in append order.
    async fn read_entries(&self) -> LedgerResult<Vec<NumberedEntry>>;

    /// Append a single entry at the end.
    async fn append_entry(&self, entry: &LedgerEntry) -> LedgerResult<()>;

    /// Overwrite the whole store. Offline use only: concurrent appends made
    /// while this runs may be lost.
    async fn replace_entries(&self, entries: &[LedgerEntry]) -> LedgerResult<()>;
}
