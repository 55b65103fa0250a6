use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::ledger::{JsonlLedgerStore, MessageLedger};
use std::path::PathBuf;

/// Submit a new pending message to the shared ledger
pub async fn execute(content: String, dir: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let ledger = MessageLedger::new(JsonlLedgerStore::new(layout.ledger()));

    let message = ledger.append(content).await?;

    println!("📝 Submitted message {} ({})", message.id, message.status);
    Ok(())
}
