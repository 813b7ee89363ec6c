//! # Funnel CLI Module
//!
//! This module implements the CLI interface for Funnel.
//!
//! ## Available Commands
//!
//! - `server` - Start the refresh timer and the HTTP API
//! - `fetch` - Fetch from the CRM once and write (merge) the CSV table
//! - `build` - Build a CSV table from a JSON file of deal records
//! - `summary` - Print stage counts and won revenue of a CSV table

mod commands;

use crate::config::Config;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Funnel - CRM deal stage intervals for the sales dashboard
///
/// Fetches deals from the CRM, turns each deal's stage history into
/// contiguous intervals, and serves the resulting table.
#[derive(Parser, Debug)]
#[command(name = "funnel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file (default: ./funnel.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Fetch deals from the CRM once and write the CSV table
    Fetch {
        /// Output CSV path (default: cache.csv_path, else funnel.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite the file instead of merging into it
        #[arg(long)]
        replace: bool,
    },

    /// Build a CSV table from a JSON array of deal records
    Build {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize a CSV table
    Summary {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Owners to include (comma-separated)
        #[arg(long)]
        owner: Option<String>,

        /// Statuses to include (comma-separated: open, won, lost, deleted)
        #[arg(long)]
        status: Option<String>,

        /// Pipeline id, or "all" (default: report.pipeline_id)
        #[arg(long)]
        pipeline_id: Option<String>,

        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<chrono::NaiveDate>,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<chrono::NaiveDate>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let config = Config::load(cli.config.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&config, &host, port).await,
        Some(Commands::Fetch { output, replace }) => {
            cmd_fetch(&config, output, replace, json_mode).await
        }
        Some(Commands::Build { input, output }) => cmd_build(&input, &output, json_mode).await,
        Some(Commands::Summary {
            input,
            owner,
            status,
            pipeline_id,
            from,
            to,
        }) => {
            let query = crate::api::FunnelQuery {
                owner,
                status,
                pipeline_id,
                from,
                to,
                date_key: None,
            };
            cmd_summary(&config, &input, &query, json_mode)
        }
        None => {
            // No subcommand - serve with defaults
            cmd_server(&config, "127.0.0.1", 8080).await
        }
    }
}
