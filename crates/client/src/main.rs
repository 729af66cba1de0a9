//! blocksync: sync a base directory against a blocksync cluster
//!
//! One invocation runs one sync pass:
//!
//! ```text
//! blocksync localhost:8080 ./data 4096
//! ```

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::Styles;
use clap::Parser;
use color_eyre::Result;

use blocksync_client::{sync, RpcClient};

/// Exit code for command-line usage errors
const EX_USAGE: i32 = 64;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a directory against a blocksync cluster")]
struct Cli {
    /// Metadata server address (host:port)
    meta_addr: String,

    /// Base directory to sync
    base_dir: PathBuf,

    /// Block size in bytes
    block_size: usize,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(EX_USAGE);
    });
    if cli.block_size == 0 {
        eprintln!("error: block size must be positive");
        std::process::exit(EX_USAGE);
    }

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client = RpcClient::new(cli.meta_addr);
    sync(&client, &cli.base_dir, cli.block_size).await
}
