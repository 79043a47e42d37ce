#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for a POP3 maildrop

use clap::{Parser, Subcommand};
use pop3_client::{Identifiers, Pop3Client, Pop3Config};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pop3-cli")]
#[command(about = "Inspect and clean up a POP3 maildrop")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show the session: message count, maildrop size, login method
    Status,

    /// List message identifiers with their sizes
    List,

    /// Print a whole message
    Show {
        /// Message identifier
        id: String,
    },

    /// Print the header of a message
    Header {
        /// Message identifier
        id: String,

        /// Number of body lines to include
        #[arg(long, default_value = "0")]
        lines: u32,
    },

    /// Delete messages when the session ends
    Delete {
        /// Message identifiers
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Serialize)]
struct Listing {
    durable: bool,
    messages: Vec<ListEntry>,
}

#[derive(Serialize)]
struct ListEntry {
    id: String,
    size: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Pop3Config::from_env()?;
    let mut client = Pop3Client::new(config);

    let result = match &args.command {
        Command::Status => cmd_status(&mut client, &args).await,
        Command::List => cmd_list(&mut client, &args).await,
        Command::Show { id } => cmd_show(&mut client, id).await,
        Command::Header { id, lines } => cmd_header(&mut client, id, *lines).await,
        Command::Delete { ids } => cmd_delete(&mut client, &args, ids).await,
    };

    let disconnected = client.disconnect().await;
    result?;
    disconnected?;
    Ok(())
}

async fn cmd_status(client: &mut Pop3Client, args: &Args) -> anyhow::Result<()> {
    let info = client.status().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Server:   {}:{}", info.host, info.port);
        println!("Login:    {}", info.method);
        println!("Messages: {}", info.messages);
        println!("Size:     {} octets", info.size);
        if info.degraded {
            println!("UIDL:     unsupported (identifiers valid for this session only)");
        }
    }

    Ok(())
}

async fn cmd_list(client: &mut Pop3Client, args: &Args) -> anyhow::Result<()> {
    let identifiers = client.list_identifiers().await?;
    let durable = identifiers.is_durable();

    let mut messages = Vec::new();
    for id in identifiers.into_ids() {
        let size = client.fetch_size(&id).await?;
        messages.push(ListEntry { id, size });
    }

    if args.json {
        let listing = Listing { durable, messages };
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print_table(&messages, durable);
    }

    Ok(())
}

async fn cmd_show(client: &mut Pop3Client, id: &str) -> anyhow::Result<()> {
    let message = client.fetch(id).await?;
    print!("{}", String::from_utf8_lossy(&message));
    Ok(())
}

async fn cmd_header(client: &mut Pop3Client, id: &str, lines: u32) -> anyhow::Result<()> {
    let header = client.fetch_header(id, lines).await?;
    print!("{}", String::from_utf8_lossy(&header));
    Ok(())
}

async fn cmd_delete(client: &mut Pop3Client, args: &Args, ids: &[String]) -> anyhow::Result<()> {
    let known = match client.list_identifiers().await? {
        Identifiers::Durable(ids) | Identifiers::SessionScoped(ids) => ids,
    };
    let missing: Vec<&String> = ids.iter().filter(|id| !known.contains(*id)).collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "No such message: {}",
            missing
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    client.mark_deleted(ids.iter().cloned());
    client.disconnect().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        println!("{} message(s) deleted", ids.len());
    }

    Ok(())
}

fn print_table(messages: &[ListEntry], durable: bool) {
    if messages.is_empty() {
        println!("No messages.");
        return;
    }

    println!("{:<50} {:>10}", "ID", "Size");
    println!("{}", "-".repeat(61));

    for entry in messages {
        println!("{:<50} {:>10}", truncate(&entry.id, 50), entry.size);
    }

    println!("\n{} message(s)", messages.len());
    if !durable {
        println!("Server has no UIDL: identifiers are only valid for this session.");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
