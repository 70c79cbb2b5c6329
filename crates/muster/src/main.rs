// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Muster - join orchestration for a pool of messaging accounts.
//!
//! This binary is the operator surface: queue inspection and maintenance,
//! negative cache pruning, link parsing and configuration checks.

mod links;
mod queue;

use std::io::IsTerminal;

use clap::{Parser, Subcommand};
use muster_config::MusterConfig;
use muster_core::MusterError;
use muster_engine::ResultCache;
use muster_storage::Database;

/// Muster - join orchestration for a pool of messaging accounts.
#[derive(Parser, Debug)]
#[command(name = "muster", version, about, long_about = None)]
struct Cli {
    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect and maintain the task queue.
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Maintain the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Work with link text.
    Links {
        #[command(subcommand)]
        action: LinksCommand,
    },
    /// Manage muster configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Show active item counts.
    Status,
    /// List active items by next-eligible time.
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete finished items older than N days.
    Purge {
        /// Defaults to `queue.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Fail every active item.
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Delete expired negative invite entries.
    Prune,
}

#[derive(Subcommand, Debug)]
enum LinksCommand {
    /// Extract and normalize the links in TEXT.
    Parse { text: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match muster_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            muster_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.runtime.log_level);

    let use_color = !cli.plain && std::io::stdout().is_terminal();
    let result = match cli.command {
        Some(Commands::Queue { action }) => run_queue(&config, action, cli.json, use_color).await,
        Some(Commands::Cache {
            action: CacheCommand::Prune,
        }) => run_cache_prune(&config, cli.json).await,
        Some(Commands::Links {
            action: LinksCommand::Parse { text },
        }) => {
            links::run_parse(&text, cli.json, use_color);
            Ok(())
        }
        Some(Commands::Config {
            action: ConfigCommand::Check,
        }) => {
            print_config_ok(&config, use_color);
            Ok(())
        }
        None => {
            println!("muster: use --help for available commands");
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("muster: {err}");
        std::process::exit(1);
    }
}

async fn run_queue(
    config: &MusterConfig,
    action: QueueCommand,
    json: bool,
    use_color: bool,
) -> Result<(), MusterError> {
    let db = Database::open_with_config(&config.storage).await?;
    let queue = queue::open(db, config);
    match action {
        QueueCommand::Status => queue::run_status(&queue, json, use_color).await,
        QueueCommand::List { limit } => queue::run_list(&queue, limit, json).await,
        QueueCommand::Purge { days } => {
            queue::run_purge(&queue, days.unwrap_or(config.queue.retention_days), json).await
        }
        QueueCommand::Clear => queue::run_clear(&queue, json).await,
    }
}

async fn run_cache_prune(config: &MusterConfig, json: bool) -> Result<(), MusterError> {
    let db = Database::open_with_config(&config.storage).await?;
    let cache = ResultCache::new(db, &config.cache);
    let pruned = cache.prune_expired().await?;
    if json {
        println!("{}", serde_json::json!({ "pruned": pruned }));
    } else {
        println!("pruned {pruned} expired negative cache entries");
    }
    Ok(())
}

fn print_config_ok(config: &MusterConfig, use_color: bool) {
    if use_color {
        use colored::Colorize;
        println!("  {} configuration is valid", "✓".green());
    } else {
        println!("  [OK] configuration is valid");
    }
    println!("    database: {}", config.storage.database_path);
    println!("    accounts: {}", config.accounts.names.len());
    println!("    dispatch: {:?}", config.worker.dispatch);
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("muster={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_queue_list_with_limit() {
        let cli = Cli::try_parse_from(["muster", "queue", "list", "--limit", "5", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Some(Commands::Queue {
                action: QueueCommand::List { limit: 5 }
            })
        ));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = muster_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.runtime.log_level, "info");
    }
}
