//! # sync-runner
//!
//! Command-line driver for the Tupa POS sync engine.
//!
//! ```text
//! sync-runner [--config engine.toml] <command>
//!
//!   providers                             registered POS providers
//!   sync [--client ID] [--from T --to T]  run clients concurrently, then push
//!        [--no-push]
//!   push --client ID [--days N]           push stored records to the ERP
//!   cleanup [--days N]                    delete old processed ERP records
//!   history --client ID [--limit N]       recent sync runs
//! ```
//!
//! Reports are printed to stdout as JSON; logs go to stderr and honour
//! `RUST_LOG`.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tupa_sync::EngineConfig;

use crate::commands::Engine;

#[derive(Debug, Parser)]
#[command(name = "sync-runner", version, about = "Sync POS sales into daily consumption records and the ERP")]
struct Cli {
    /// Path to engine.toml (defaults to the platform config directory).
    #[arg(long, env = "TUPA_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the registered POS providers.
    Providers,

    /// Sync configured clients, one task per client.
    Sync {
        /// Only sync this client.
        #[arg(long)]
        client: Option<String>,

        /// Start of an explicit window (RFC 3339).
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// End of an explicit window (RFC 3339).
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,

        /// Keep records local; skip the ERP push.
        #[arg(long)]
        no_push: bool,
    },

    /// Push a client's stored records to the ERP.
    Push {
        #[arg(long)]
        client: String,

        /// How many days back, today included.
        #[arg(long, default_value_t = 1)]
        days: u32,
    },

    /// Delete processed ERP records older than N days, and local sync logs
    /// of the same age.
    Cleanup {
        /// Defaults to `erp.cleanup_after_days`.
        #[arg(long)]
        days: Option<u32>,
    },

    /// Print recent sync runs of a client.
    History {
        #[arg(long)]
        client: String,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config).context("loading engine configuration")?;

    // Listing providers needs neither the database nor the ERP.
    if let Command::Providers = cli.command {
        return commands::print_json(&tupa_sync::AdapterRegistry::builtin().list_providers());
    }

    let engine = Engine::open(config).await?;
    let result = match cli.command {
        Command::Providers => Ok(()),
        Command::Sync {
            client,
            from,
            to,
            no_push,
        } => engine.sync(client.as_deref(), from.zip(to), !no_push).await,
        Command::Push { client, days } => engine.push(&client, days).await,
        Command::Cleanup { days } => engine.cleanup(days).await,
        Command::History { client, limit } => engine.history(&client, limit).await,
    };

    engine.close().await;
    result
}

/// Logs to stderr so stdout stays machine-readable.
///
/// ## Log Levels
/// - Default: `info`, with sqlx quietened
/// - `RUST_LOG=tupa_sync=debug` - every vendor request and batch
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_window_needs_both_ends() {
        let parsed = Cli::try_parse_from([
            "sync-runner",
            "sync",
            "--from",
            "2024-03-10T00:00:00Z",
            "--to",
            "2024-03-11T00:00:00Z",
            "--no-push",
        ])
        .unwrap();
        match parsed.command {
            Command::Sync {
                from, to, no_push, ..
            } => {
                assert!(from.is_some() && to.is_some());
                assert!(no_push);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["sync-runner", "sync", "--from", "2024-03-10T00:00:00Z"]).is_err());
        assert!(Cli::try_parse_from(["sync-runner", "push"]).is_err());
    }
}
