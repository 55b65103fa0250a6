use quorum_signer::config::ParticipantConfig;
use quorum_signer::crypto::{FrostScheme, ThresholdScheme};
use quorum_signer::layout::{WorkspaceLayout, KEYS_DIR};
use quorum_signer::shares::{ShareStore, SECRET_SHARE_FILE};
use std::path::PathBuf;

/// Generate key material and one participant config per share
///
/// Writes the group key bundle, the hex verifying key, every participant's
/// secret share and `participants/share<N>.toml`. Existing key material is
/// only replaced with `--force`.
pub async fn execute(
    n: u16,
    t: u16,
    dir: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));

    println!("Generating {}-of-{} threshold keys...", t, n);
    let keys = FrostScheme::new().generate_keys(n, t)?;

    let shares = ShareStore::new(layout.keys_dir());
    shares.install(&keys, force).await?;

    for share in &keys.shares {
        // Relative to participants/, so the workspace can be moved as a whole.
        let share_path = PathBuf::from("..")
            .join(KEYS_DIR)
            .join(&share.participant_id)
            .join(SECRET_SHARE_FILE);
        let config = ParticipantConfig::new(share.participant_id.clone(), t, share_path);
        config
            .save(&layout.participant_config(&share.participant_id))
            .await?;
    }

    println!();
    println!("✅ Key material written to {}", layout.keys_dir().display());
    println!(
        "   Group verifying key: {}",
        keys.group_key.verifying_key().to_hex()
    );
    println!(
        "   Participant configs: {} ({} files)",
        layout.participants_dir().display(),
        keys.shares.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_generate_writes_keys_and_configs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().to_string();

        execute(5, 3, Some(root.clone()), false).await.unwrap();

        let layout = WorkspaceLayout::new(dir.path());
        let shares = ShareStore::new(layout.keys_dir());
        assert!(shares.load_group_key().await.is_ok());
        for id in ["1", "2", "3", "4", "5"] {
            let config = ParticipantConfig::load(&layout.participant_config(id))
                .await
                .unwrap();
            assert_eq!(config.participant_id, id);
            assert_eq!(config.threshold, 3);
            let share = ShareStore::load_share_from(&config.share_path).await.unwrap();
            assert_eq!(share.participant_id, id);
        }
    }

    #[tokio::test]
    async fn test_generate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().to_string();

        execute(3, 2, Some(root.clone()), false).await.unwrap();
        assert!(execute(3, 2, Some(root.clone()), false).await.is_err());
        assert!(execute(3, 2, Some(root), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_threshold() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().to_string();

        assert!(execute(3, 4, Some(root.clone()), false).await.is_err());
        assert!(execute(3, 1, Some(root), false).await.is_err());
    }
}
