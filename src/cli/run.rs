use quorum_signer::config::ParticipantConfig;
use quorum_signer::daemon::{DaemonExit, SigningDaemon};
use std::path::Path;

use super::shutdown_on_ctrl_c;

/// Run one signing daemon until Ctrl-C, or until idle when configured
pub async fn execute(config: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = ParticipantConfig::load(Path::new(&config)).await?;
    let participant = config.participant_id.clone();

    println!("🚀 Starting signing daemon for participant {}", participant);
    let mut daemon = SigningDaemon::from_config(config)?;

    match daemon.run(shutdown_on_ctrl_c()).await? {
        DaemonExit::Shutdown => println!("👋 Daemon {} stopped", participant),
        DaemonExit::Idle => println!("✅ Daemon {} has no work left", participant),
    }
    Ok(())
}
