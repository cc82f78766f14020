use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gitwire_core::MemoryStorage;
use gitwire_transfer::server::serve_receive_pack;
use gitwire_transfer::Connection;

#[derive(Parser, Debug)]
#[command(name = "gitwire-receive-pack")]
#[command(about = "Serve git-receive-pack for a repository over stdio")]
struct Args {
    /// Repository directory (refs and objects files in the memory backend
    /// fixture format).
    git_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    // Keep stdout clean: it carries the protocol stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(129);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("ERR: {:#}", e);
        std::process::exit(128);
    }
}

async fn run(args: Args) -> Result<()> {
    let storage = MemoryStorage::load_dir(&args.git_dir)?;
    tracing::info!(git_dir = %args.git_dir.display(), "serving git-receive-pack");

    let conn = Connection::new(tokio::io::stdin(), tokio::io::stdout());
    let cancel = CancellationToken::new();

    if let Some(report) = serve_receive_pack(&storage, conn, &cancel).await? {
        for status in &report.command_statuses {
            if !status.is_ok() {
                tracing::warn!(name = %status.name, status = %status.status, "command failed");
            }
        }
    }
    Ok(())
}
