//! blocksync-server: metadata and block service entry point
//!
//! Hosts the metadata service, a block service, or both in one process:
//!
//! ```text
//! blocksync-server -s both -p 8080 localhost:8080
//! blocksync-server -s block -p 9001
//! blocksync-server -s meta -p 8080 host-a:9001 host-b:9002
//! ```

use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::Styles;
use clap::{Parser, ValueEnum};
use color_eyre::Result;
use tokio::net::TcpListener;
use tracing::info;

use blocksync_server::{serve, Services};

/// Exit code for command-line usage errors
const EX_USAGE: i32 = 64;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(name = "blocksync-server")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "blocksync metadata and block services")]
struct Cli {
    /// Service hosted by this process
    #[arg(short = 's', long = "service", value_enum)]
    service: ServiceType,

    /// Port to accept connections on
    #[arg(short = 'p', long = "port", default_value_t = 8080)]
    port: u16,

    /// Listen on loopback only
    #[arg(short = 'l', long = "local-only")]
    local_only: bool,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Block-server addresses handed to the metadata service. Must include
    /// this server's own address when hosting both services.
    block_store_addrs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceType {
    Meta,
    Block,
    Both,
}

fn parse_args() -> Cli {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(EX_USAGE);
    });

    let needs_addrs = matches!(cli.service, ServiceType::Meta | ServiceType::Both);
    if needs_addrs && cli.block_store_addrs.is_empty() {
        eprintln!("error: the metadata service needs at least one block-server address");
        std::process::exit(EX_USAGE);
    }

    if cli.service == ServiceType::Both {
        let own_port = format!(":{}", cli.port);
        if !cli.block_store_addrs.iter().any(|a| a.ends_with(&own_port)) {
            eprintln!(
                "error: with -s both the block-server addresses must include this server (port {})",
                cli.port
            );
            std::process::exit(EX_USAGE);
        }
    }

    cli
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = parse_args();

    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let services = match cli.service {
        ServiceType::Meta => Services::meta(cli.block_store_addrs),
        ServiceType::Block => Services::block(),
        ServiceType::Both => Services::both(cli.block_store_addrs),
    };

    let host = if cli.local_only { "127.0.0.1" } else { "0.0.0.0" };
    let listener = TcpListener::bind((host, cli.port)).await?;
    info!("{:?} service starting", cli.service);
    serve(listener, services).await
}
