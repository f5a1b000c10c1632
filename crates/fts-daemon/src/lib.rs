//! Full-text indexer binary library exports.
//!
//! - `cli`: command-line parsing with clap
//! - `commands`: start and admin command implementations

pub mod cli;
pub mod commands;

pub use cli::{AdminCommands, Cli, Commands};
pub use commands::{
    handle_admin, init_logging, load_settings, run_admin, start_daemon, IndexerRuntime, Overrides,
};
