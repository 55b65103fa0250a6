use quorum_signer::crypto::{AggregateSignature, FrostScheme, ThresholdScheme};
use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::shares::ShareStore;
use quorum_signer::signatures::SignatureLog;
use std::path::PathBuf;

/// Check `content` against the latest recorded aggregate signature
pub async fn execute(content: String, dir: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));

    let Some(record) = SignatureLog::in_dir(&layout.keys_dir()).latest().await? else {
        return Err("No aggregate signature has been recorded yet".into());
    };
    let verifying_key = ShareStore::new(layout.keys_dir())
        .load_verifying_key()
        .await?;
    let signature = AggregateSignature::from_hex(&record.signature)?;

    println!("🔍 Verifying against signature for message {}", record.message_id);
    if FrostScheme::new().verify(content.as_bytes(), &signature, &verifying_key) {
        println!("✅ Signature is valid");
        Ok(())
    } else {
        Err(format!(
            "Signature for message {} does not match the given content",
            record.message_id
        )
        .into())
    }
}
