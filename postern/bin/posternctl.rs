//! Command-line utility for querying and managing the postern resolver
//!
//! Talks to `postern-resolver` over its channel socket:
//! - Checking whether a recipient would be accepted
//! - Liveness and status
//! - Forcing a configuration reload
//! - Query cache statistics and clearing

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use postern::Reply;
use postern_channel::{ChannelClient, DEFAULT_CHANNEL_SOCKET};

/// Exit status for a deferred verdict, as in sysexits' `EX_TEMPFAIL`
const EXIT_TEMPFAIL: u8 = 75;

/// Query and manage the postern resolver
#[derive(Parser, Debug)]
#[command(name = "posternctl")]
#[command(about = "Query and manage the postern resolver", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the resolver socket
    #[arg(short, long, default_value = DEFAULT_CHANNEL_SOCKET)]
    socket: PathBuf,

    /// Seconds to wait for an answer
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask whether a recipient would be accepted
    Check {
        /// Recipient address, e.g. alice@example.com
        address: String,

        /// Hosting context to resolve in
        #[arg(long)]
        hint: Option<String>,
    },
    /// Check if the resolver is responding
    Ping,
    /// Show uptime, configuration generation and cache statistics
    Status,
    /// Re-read the delivery configuration now
    Reload,
    /// Query cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Drop every cached verdict
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let client = check_channel_socket(&cli.socket)?
        .with_timeout(std::time::Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Check { address, hint } => {
            let resolution = client.resolve(&address, hint.as_deref()).await?;
            let reply = Reply::from(&resolution.verdict);

            println!("{reply}");
            println!(
                "  generation {}{}",
                resolution.generation,
                if resolution.cache_hit { ", cached" } else { "" }
            );

            return Ok(match reply {
                Reply::Ok(_) => ExitCode::SUCCESS,
                Reply::No(_) => ExitCode::FAILURE,
                Reply::Defer(_) => ExitCode::from(EXIT_TEMPFAIL),
            });
        }
        Commands::Ping => {
            client.ping().await?;
            println!("✓ Resolver is responding");
        }
        Commands::Status => {
            let status = client.status().await?;
            println!("=== Resolver Status ===\n");
            println!("{status}");
        }
        Commands::Reload => {
            let generation = client.reload().await?;
            println!("✓ Configuration reloaded (generation {generation})");
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => {
                let stats = client.cache_stats().await?;
                println!("{stats}");
            }
            CacheAction::Clear => {
                client.cache_clear().await?;
                println!("✓ Query cache cleared");
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn check_channel_socket(socket_path: &std::path::Path) -> anyhow::Result<ChannelClient> {
    if !socket_path.exists() {
        anyhow::bail!(
            "Cannot connect to the postern resolver socket at {}.\n\
             \n\
             Is postern-resolver running?\n\
             You can configure the socket path with --socket or in postern.config.ron",
            socket_path.display()
        );
    }

    Ok(ChannelClient::new(socket_path))
}
