//! CLI argument parsing for the indexer binary.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Incremental full-text indexer
#[derive(Parser, Debug)]
#[command(name = "fts-indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/fts-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override search index path
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduled indexer until interrupted
    Start,

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

/// Admin subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AdminCommands {
    /// Move the event-log cursor to a sequence id
    ResetCursor {
        /// New watermark; 0 replays the whole log
        value: u64,
    },

    /// Clear the index and repopulate it from the primary store
    Rebuild,

    /// Clear and repopulate one entity type
    RebuildType {
        /// Entity type name, e.g. Image
        entity_type: String,
    },

    /// Queue one entity for reindexing and run the indexer once
    Reindex {
        /// Entity type name, e.g. Image
        entity_type: String,

        /// Entity id
        id: u64,
    },

    /// Run the indexer once
    RunOnce {
        /// Build documents without writing the index or moving the cursor
        #[arg(long)]
        dry_run: bool,
    },

    /// Show cursor position, backlog and metrics
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}
