//! # empipe - EM Pipeline Set Inspector
//!
//! The main binary for the empipe persistence substrate.
//!
//! This application provides a CLI over set files produced by
//! `empipe-core`: inspect metadata, stream items, enumerate referenced
//! files, manage secondary indexes, and walk the provenance graph.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect a set file
//! empipe info -s runs/picking/coordinates.redb
//!
//! # Stream items, filtered through a secondary index
//! empipe items -s coordinates.redb --attr mic_id=7 --limit 20
//!
//! # Provenance of a set within a working directory
//! empipe related -w runs/picking -s particles.redb --direction parents
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing — EMPIPE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("EMPIPE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "empipe=debug"
    } else {
        "empipe=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
