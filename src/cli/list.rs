use quorum_signer::layout::WorkspaceLayout;
use quorum_signer::ledger::{JsonlLedgerStore, Message, MessageLedger, MessageStatus};
use std::path::PathBuf;

/// List ledger messages, optionally filtered by status
pub async fn execute(
    dir: Option<String>,
    status: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = status
        .map(|s| s.parse::<MessageStatus>())
        .transpose()?;

    let layout = WorkspaceLayout::resolve(dir.map(PathBuf::from));
    let ledger = MessageLedger::new(JsonlLedgerStore::new(layout.ledger()));
    let messages = filter_messages(ledger.list_all().await?, filter);

    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<8} CONTENT", "ID", "STATUS", "SIGNERS");
    for message in &messages {
        println!("{}", format_row(message));
    }
    Ok(())
}

fn filter_messages(messages: Vec<Message>, status: Option<MessageStatus>) -> Vec<Message> {
    match status {
        Some(status) => messages.into_iter().filter(|m| m.status == status).collect(),
        None => messages,
    }
}

fn format_row(message: &Message) -> String {
    let signers = if message.contributions.is_empty() {
        "-".to_string()
    } else {
        message.contributors().join(",")
    };
    format!(
        "{:<6} {:<10} {:<8} {}",
        message.id,
        message.status.as_str(),
        signers,
        message.content.replace('\n', " ")
    )
}
