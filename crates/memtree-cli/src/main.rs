mod cli;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::utils::open_store;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose raises the default level
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = config::CliConfig::load()?;
    let db_path = config.resolve_db_path(cli.db_path.as_deref())?;
    tracing::debug!(db_path = %db_path.display(), "Resolved database path");

    match cli.command {
        Commands::Config => commands::config::run(&config, &db_path, cli.format),
        Commands::Turns(args) => commands::turns::run(&open_store(&db_path)?, args, cli.format),
        Commands::Stack(args) => {
            commands::stack::run(&open_store(&db_path)?, &args.chat_id, cli.format)
        }
        Commands::Tree(args) => {
            commands::tree::run(&open_store(&db_path)?, &args.chat_id, cli.format)
        }
        Commands::Lineage(args) => {
            commands::lineage::run(&open_store(&db_path)?, &args.chat_id, cli.format)
        }
        Commands::Check(args) => {
            commands::check::run(&open_store(&db_path)?, &args.chat_id, cli.format)
        }
    }
}
