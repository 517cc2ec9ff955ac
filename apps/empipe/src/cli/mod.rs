//! # empipe CLI Module
//!
//! This module implements the CLI interface for empipe.
//!
//! ## Available Commands
//!
//! - `info` - Show a set's kind, size, metadata, and indexes
//! - `items` - Stream items from a set, with filtering and ordering
//! - `files` - Enumerate every file a set references
//! - `index` - Create, drop, or list secondary indexes
//! - `related` - Walk the provenance graph of a working directory

mod commands;

use clap::{Parser, Subcommand};
use empipe_core::EmpipeError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// empipe - EM Pipeline Set Inspector
///
/// Inspect and manage the durable sets an electron-microscopy
/// processing pipeline produces: micrographs, coordinates, particles,
/// CTF estimates, classifications, and the provenance between them.
#[derive(Parser, Debug)]
#[command(name = "empipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a set's kind, size, metadata, and indexes
    Info {
        /// Path to the set file
        #[arg(short, long)]
        set: PathBuf,
    },

    /// Stream items from a set
    Items {
        /// Path to the set file
        #[arg(short, long)]
        set: PathBuf,

        /// Equality filter, as attribute=value
        #[arg(short, long)]
        attr: Option<String>,

        /// Order by this attribute instead of id
        #[arg(short, long)]
        order_by: Option<String>,

        /// Descending order
        #[arg(short, long)]
        desc: bool,

        /// Only enabled items
        #[arg(short, long)]
        enabled: bool,

        /// Maximum number of items to print
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Enumerate every file a set references
    Files {
        /// Path to the set file
        #[arg(short, long)]
        set: PathBuf,
    },

    /// Create, drop, or list secondary indexes
    Index {
        /// Path to the set file
        #[arg(short, long)]
        set: PathBuf,

        /// Create an index over this attribute
        #[arg(short, long)]
        create: Option<String>,

        /// Drop the index over this attribute
        #[arg(short, long)]
        drop: Option<String>,
    },

    /// Walk the provenance graph of a working directory
    Related {
        /// Working directory holding the relations graph
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Path to the set file to start from
        #[arg(short, long)]
        set: PathBuf,

        /// Direction: parents or children
        #[arg(short, long, default_value = "parents")]
        direction: String,

        /// Edge kind: source, transform, or ctf
        #[arg(short, long, default_value = "source")]
        kind: String,
    },
}

// =============================================================================
// COMMAND DISPATCH
// =============================================================================

/// Execute the parsed CLI command.
pub fn execute(cli: Cli) -> Result<(), EmpipeError> {
    match cli.command {
        Commands::Info { set } => cmd_info(&set, cli.json_mode),
        Commands::Items {
            set,
            attr,
            order_by,
            desc,
            enabled,
            limit,
        } => cmd_items(
            &set,
            attr.as_deref(),
            order_by.as_deref(),
            desc,
            enabled,
            limit,
            cli.json_mode,
        ),
        Commands::Files { set } => cmd_files(&set, cli.json_mode),
        Commands::Index { set, create, drop } => {
            cmd_index(&set, create.as_deref(), drop.as_deref(), cli.json_mode)
        }
        Commands::Related {
            work_dir,
            set,
            direction,
            kind,
        } => cmd_related(&work_dir, &set, &direction, &kind, cli.json_mode),
    }
}
