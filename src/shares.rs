//! Local key material access.
//!
//! Secret shares live at `<keys_dir>/<participant_id>/secret_share.json` and
//! are read through [`Zeroizing`] buffers so the plaintext JSON does not
//! linger in memory after parsing.

use crate::crypto::{GeneratedKeys, GroupKey, GroupVerifyingKey, KeyShare};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const SECRET_SHARE_FILE: &str = "secret_share.json";
pub const GROUP_KEY_FILE: &str = "group_key_bundle.json";
pub const PUBLIC_KEY_FILE: &str = "public_key.txt";

pub type ShareResult<T> = Result<T, ShareError>;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("Key material not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt key material in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Share at {path} belongs to participant {found}, expected {expected}")]
    IdentityMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Key material already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),
}

impl ShareError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ShareError::NotFound(path.to_path_buf())
        } else {
            ShareError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Accessor for the key directory of one workspace.
#[derive(Debug, Clone)]
pub struct ShareStore {
    keys_dir: PathBuf,
}

impl ShareStore {
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
        }
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    pub fn share_path(&self, participant_id: &str) -> PathBuf {
        self.keys_dir.join(participant_id).join(SECRET_SHARE_FILE)
    }

    pub fn group_key_path(&self) -> PathBuf {
        self.keys_dir.join(GROUP_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.keys_dir.join(PUBLIC_KEY_FILE)
    }

    /// Resolve a participant's share by identity.
    pub async fn load_share(&self, participant_id: &str) -> ShareResult<KeyShare> {
        let path = self.share_path(participant_id);
        let share = Self::load_share_from(&path).await?;
        if share.participant_id != participant_id {
            return Err(ShareError::IdentityMismatch {
                path,
                expected: participant_id.to_string(),
                found: share.participant_id,
            });
        }
        Ok(share)
    }

    /// Read a share from an explicit path (a participant config's `share_path`).
    pub async fn load_share_from(path: &Path) -> ShareResult<KeyShare> {
        let contents = Zeroizing::new(
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ShareError::io(path, e))?,
        );
        serde_json::from_str(&contents).map_err(|e| ShareError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub async fn load_group_key(&self) -> ShareResult<GroupKey> {
        let path = self.group_key_path();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ShareError::io(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| ShareError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Group verifying key from `public_key.txt`.
    pub async fn load_verifying_key(&self) -> ShareResult<GroupVerifyingKey> {
        let path = self.public_key_path();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ShareError::io(&path, e))?;
        GroupVerifyingKey::from_hex(&contents).map_err(|e| ShareError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Write freshly dealt key material.
    ///
    /// Refuses to replace an existing group key unless `overwrite` is set,
    /// since doing so orphans every share and signature made under it.
    pub async fn install(&self, keys: &GeneratedKeys, overwrite: bool) -> ShareResult<()> {
        let group_path = self.group_key_path();
        if !overwrite && tokio::fs::try_exists(&group_path).await.unwrap_or(false) {
            return Err(ShareError::AlreadyExists(group_path));
        }

        tokio::fs::create_dir_all(&self.keys_dir)
            .await
            .map_err(|e| ShareError::io(&self.keys_dir, e))?;

        let bundle = serde_json::to_string_pretty(&keys.group_key).map_err(|e| {
            ShareError::Corrupt {
                path: group_path.clone(),
                reason: e.to_string(),
            }
        })?;
        write_file(&group_path, bundle.as_bytes(), false).await?;
        write_file(
            &self.public_key_path(),
            keys.group_key.verifying_key().to_hex().as_bytes(),
            false,
        )
        .await?;

        for share in &keys.shares {
            let path = self.share_path(&share.participant_id);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ShareError::io(parent, e))?;
            }
            let encoded =
                Zeroizing::new(serde_json::to_string_pretty(share).map_err(|e| {
                    ShareError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?);
            write_file(&path, encoded.as_bytes(), true).await?;
            debug!(participant = %share.participant_id, path = %path.display(), "Wrote secret share");
        }

        info!(
            shares = keys.shares.len(),
            keys_dir = %self.keys_dir.display(),
            "Installed key material"
        );
        Ok(())
    }
}

async fn write_file(path: &Path, contents: &[u8], secret: bool) -> ShareResult<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        if secret {
            // Owner read/write only.
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path).await.map_err(|e| ShareError::io(path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| ShareError::io(path, e))?;
    file.flush().await.map_err(|e| ShareError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{FrostScheme, ThresholdScheme};
    use tempfile::TempDir;

    async fn installed(n: u16, t: u16) -> (TempDir, ShareStore, GeneratedKeys) {
        let dir = TempDir::new().unwrap();
        let store = ShareStore::new(dir.path().join("keys"));
        let keys = FrostScheme::new().generate_keys(n, t).unwrap();
        store.install(&keys, false).await.unwrap();
        (dir, store, keys)
    }

    #[tokio::test]
    async fn test_install_then_load_by_identity() {
        let (_dir, store, keys) = installed(3, 2).await;

        for expected in &keys.shares {
            let share = store.load_share(&expected.participant_id).await.unwrap();
            assert_eq!(share.participant_id, expected.participant_id);
            assert_eq!(share.threshold, 2);
            assert_eq!(share.identifier(), expected.identifier());
        }
    }

    #[tokio::test]
    async fn test_group_key_and_public_key_agree() {
        let (_dir, store, keys) = installed(3, 2).await;

        let group = store.load_group_key().await.unwrap();
        let verifying = store.load_verifying_key().await.unwrap();

        assert_eq!(group.verifying_key(), keys.group_key.verifying_key());
        assert_eq!(verifying, keys.group_key.verifying_key());
    }

    #[tokio::test]
    async fn test_missing_share_is_not_found() {
        let (_dir, store, _keys) = installed(3, 2).await;

        let err = store.load_share("9").await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_corrupt_share_is_reported() {
        let (_dir, store, _keys) = installed(3, 2).await;
        tokio::fs::write(store.share_path("2"), "{not json")
            .await
            .unwrap();

        let err = store.load_share("2").await.unwrap_err();
        assert!(matches!(err, ShareError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_share_in_wrong_directory_is_mismatch() {
        let (_dir, store, _keys) = installed(3, 2).await;
        let misplaced = tokio::fs::read(store.share_path("1")).await.unwrap();
        tokio::fs::write(store.share_path("2"), misplaced).await.unwrap();

        let err = store.load_share("2").await.unwrap_err();
        assert!(matches!(err, ShareError::IdentityMismatch { ref found, .. } if found == "1"));
    }

    #[tokio::test]
    async fn test_install_refuses_overwrite_without_force() {
        let (_dir, store, _keys) = installed(3, 2).await;
        let fresh = FrostScheme::new().generate_keys(3, 2).unwrap();

        let err = store.install(&fresh, false).await.unwrap_err();
        assert!(matches!(err, ShareError::AlreadyExists(_)));

        store.install(&fresh, true).await.unwrap();
        assert_eq!(
            store.load_verifying_key().await.unwrap(),
            fresh.group_key.verifying_key()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_secret_share_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store, _keys) = installed(3, 2).await;
        let metadata = std::fs::metadata(store.share_path("1")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
