use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

pub mod broadcast;
pub mod compact;
pub mod fleet;
pub mod generate;
pub mod list;
pub mod run;
pub mod sign_partial;
pub mod submit;
pub mod verify;
pub mod version;

#[derive(Parser)]
#[command(name = "quorum-signer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Threshold signing coordinator for a shared message ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate threshold key material and participant configs
    Generate {
        /// Number of participants
        #[arg(long)]
        n: u16,

        /// Signatures required to produce an aggregate
        #[arg(long)]
        t: u16,

        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,

        /// Overwrite existing key material
        #[arg(long)]
        force: bool,
    },

    /// Submit a message for signing
    Submit {
        #[arg(long)]
        content: String,

        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// List messages in the ledger
    List {
        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,

        /// Only show messages with this status (pending, signed, broadcast)
        #[arg(long)]
        status: Option<String>,
    },

    /// Contribute a participant's agreement to sign by hand
    SignPartial {
        /// Message id
        #[arg(long)]
        id: u64,

        /// Participant whose share is used
        #[arg(long)]
        participant: String,

        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// Aggregate and publish a signed message by hand
    Broadcast {
        /// Message id
        #[arg(long)]
        id: u64,

        /// Threshold the key material was generated with
        #[arg(long)]
        threshold: u16,

        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// Verify content against the latest aggregate signature
    Verify {
        #[arg(long)]
        content: String,

        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// Compact the ledger (stop all daemons first)
    Compact {
        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// Run one participant's signing daemon
    Run {
        /// Path to the participant config file
        #[arg(long)]
        config: String,
    },

    /// Run a daemon for every participant config in the workspace
    Fleet {
        /// Workspace root (default: ~/.local/share/quorum-signer)
        #[arg(long)]
        dir: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Generate { n, t, dir, force } => generate::execute(n, t, dir, force).await,
        Commands::Submit { content, dir } => submit::execute(content, dir).await,
        Commands::List { dir, status } => list::execute(dir, status).await,
        Commands::SignPartial {
            id,
            participant,
            dir,
        } => sign_partial::execute(id, participant, dir).await,
        Commands::Broadcast { id, threshold, dir } => {
            broadcast::execute(id, threshold, dir).await
        }
        Commands::Verify { content, dir } => verify::execute(content, dir).await,
        Commands::Compact { dir } => compact::execute(dir).await,
        Commands::Run { config } => run::execute(config).await,
        Commands::Fleet { dir } => fleet::execute(dir).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

/// Shutdown signal flipped to `true` on Ctrl-C.
pub(crate) fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                // Dropping the sender would read as shutdown.
                tx.closed().await;
            }
        }
    });
    rx
}
