//! CLI layer for kb-chat.
//!
//! Provides the command-line interface using clap, with commands for
//! initializing the database, indexing message exports, searching, asking
//! questions, and reading thread history.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands, ScopeArgs};
