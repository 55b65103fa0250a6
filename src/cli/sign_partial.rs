use chrono::Utc;
use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::ledger::{ContributionOutcome, JsonlLedgerStore, MessageLedger};
use quorum_signer::shares::ShareStore;
use std::path::PathBuf;

/// Record a manual contribution from `participant` to message `id`
///
/// The participant's share must exist; its threshold decides when the
/// message is marked signed.
pub async fn execute(
    id: u64,
    participant: String,
    dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let share = ShareStore::new(layout.keys_dir())
        .load_share(&participant)
        .await?;
    let threshold = share.threshold;

    let ledger = MessageLedger::new(JsonlLedgerStore::new(layout.ledger()));
    let outcome = ledger
        .contribute(id, &participant, threshold, Utc::now())
        .await?;

    match outcome {
        ContributionOutcome::Recorded { contributions } => {
            println!(
                "✍️  Participant {} contributed to message {} ({}/{})",
                participant, id, contributions, threshold
            );
        }
        ContributionOutcome::AlreadyContributed => {
            println!("Participant {} already contributed to message {}", participant, id);
        }
        ContributionOutcome::ThresholdAlreadyMet { contributions } => {
            println!(
                "Message {} already has {} contributions, nothing recorded",
                id, contributions
            );
        }
        ContributionOutcome::NotPending(status) => {
            println!("Message {} is {}, nothing recorded", id, status);
            return Ok(());
        }
    }

    if ledger.mark_signed(id, threshold).await? {
        println!("✅ Message {} reached threshold and is now signed", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_signer::crypto::{FrostScheme, ThresholdScheme};
    use quorum_signer::ledger::MessageStatus;
    use tempfile::TempDir;

    async fn workspace(n: u16, t: u16) -> (TempDir, MessageLedger<JsonlLedgerStore>) {
        let dir = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let keys = FrostScheme::new().generate_keys(n, t).unwrap();
        ShareStore::new(layout.keys_dir())
            .install(&keys, false)
            .await
            .unwrap();
        let ledger = MessageLedger::new(JsonlLedgerStore::new(layout.ledger()));
        ledger.append("hold the line").await.unwrap();
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_manual_contributions_reach_signed() {
        let (dir, ledger) = workspace(3, 2).await;
        let root = Some(dir.path().to_string_lossy().to_string());

        execute(1, "1".to_string(), root.clone()).await.unwrap();
        let message = ledger.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Pending);

        execute(1, "3".to_string(), root).await.unwrap();
        let message = ledger.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Signed);
        assert_eq!(message.contributors(), vec!["1".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_participant_is_rejected() {
        let (dir, ledger) = workspace(3, 2).await;
        let root = Some(dir.path().to_string_lossy().to_string());

        assert!(execute(1, "9".to_string(), root).await.is_err());
        let message = ledger.get_by_id(1).await.unwrap().unwrap();
        assert!(message.contributions.is_empty());
    }
}
