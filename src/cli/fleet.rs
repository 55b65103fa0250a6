use quorum_signer::fleet::{FleetLauncher, MemberOutcome};
use quorum_signer::layout::WorkspaceLayout;
use std::path::PathBuf;

use super::shutdown_on_ctrl_c;

/// Launch one daemon per participant config and supervise them
pub async fn execute(dir: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let launcher = FleetLauncher::new(layout.participants_dir());

    println!(
        "🚀 Launching fleet from {}",
        launcher.participants_dir().display()
    );
    let summary = launcher.run(shutdown_on_ctrl_c()).await?;

    for path in &summary.skipped {
        println!("⚠️  Skipped invalid config {}", path.display());
    }
    for member in &summary.members {
        let outcome = match &member.outcome {
            MemberOutcome::Exited(exit) => format!("exited ({:?})", exit),
            MemberOutcome::Failed(reason) => format!("failed: {}", reason),
            MemberOutcome::GaveUp => "gave up after repeated panics".to_string(),
        };
        println!(
            "   Participant {}: {} [{} restarts]",
            member.participant_id, outcome, member.restarts
        );
    }
    Ok(())
}
