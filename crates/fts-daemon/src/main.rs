//! Full-text indexer
//!
//! Keeps a search index in step with the primary store's event log.
//!
//! # Usage
//!
//! ```bash
//! fts-indexer start
//! fts-indexer admin reset-cursor <value>
//! fts-indexer admin rebuild
//! fts-indexer admin rebuild-type <Type>
//! fts-indexer admin run-once [--dry-run]
//! fts-indexer admin status [--json]
//! ```
//!
//! # Configuration
//!
//! Loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/fts-indexer/config.toml)
//! 3. `--config` file
//! 4. Environment variables (FTS_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use fts_daemon::{handle_admin, init_logging, load_settings, start_daemon, Cli, Commands, Overrides};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = Overrides {
        db_path: cli.db_path,
        index_path: cli.index_path,
        log_level: cli.log_level,
    };
    let settings = load_settings(cli.config.as_deref(), overrides)?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Start => start_daemon(settings).await?,
        Commands::Admin { command } => handle_admin(settings, command).await?,
    }

    Ok(())
}
