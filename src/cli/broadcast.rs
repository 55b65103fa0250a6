use quorum_signer::aggregator::{AggregationOutcome, ThresholdAggregator};
use quorum_signer::crypto::FrostScheme;
use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::ledger::{JsonlLedgerStore, MessageLedger};
use quorum_signer::publish::OutboxPublisher;
use quorum_signer::shares::ShareStore;
use quorum_signer::signatures::SignatureLog;
use std::path::PathBuf;
use std::sync::Arc;

/// Claimant recorded in the ledger for manual aggregations.
const OPERATOR: &str = "operator";

/// Aggregate, record and publish message `id` by hand
pub async fn execute(
    id: u64,
    threshold: u16,
    dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let aggregator = ThresholdAggregator::new(
        MessageLedger::new(JsonlLedgerStore::new(layout.ledger())),
        ShareStore::new(layout.keys_dir()),
        Arc::new(FrostScheme::new()),
        SignatureLog::in_dir(&layout.keys_dir()),
    )
    .with_publisher(Arc::new(OutboxPublisher::new(layout.outbox())));

    match aggregator.finalize(id, threshold, OPERATOR).await? {
        AggregationOutcome::Broadcast { record, event_id } => {
            println!("📣 Message {} broadcast", record.message_id);
            println!("   Signature: {}", record.signature);
            match event_id {
                Some(event_id) => println!("   Event: {}", event_id),
                None => println!("   ⚠️  Publishing failed; signature is recorded locally"),
            }
        }
        AggregationOutcome::AlreadyBroadcast => {
            println!("Message {} was already broadcast", id);
        }
        AggregationOutcome::ClaimedElsewhere { holder } => {
            println!(
                "Message {} is being aggregated by {}",
                id,
                holder.as_deref().unwrap_or("another participant")
            );
        }
    }
    Ok(())
}
