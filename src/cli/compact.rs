use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::ledger::{JsonlLedgerStore, LedgerStore, MessageLedger};
use std::path::PathBuf;

/// Rewrite the ledger with one minimal entry set per message
///
/// Offline only: daemons must be stopped, since appends made during the
/// rewrite are lost.
pub async fn execute(dir: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let ledger = MessageLedger::new(JsonlLedgerStore::new(layout.ledger()));

    let before = ledger.store().read_entries().await?.len();
    let messages = ledger.list_all().await?;
    ledger.replace_all(&messages).await?;
    let after = ledger.store().read_entries().await?.len();

    println!(
        "🧹 Compacted {} messages: {} entries -> {}",
        messages.len(),
        before,
        after
    );
    Ok(())
}
