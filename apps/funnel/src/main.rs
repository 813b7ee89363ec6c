//! # Funnel - Sales Funnel Server
//!
//! The main binary: fetches CRM deals, keeps the funnel table fresh, and
//! serves it to the dashboard.
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server (needs FUNNEL_API_TOKEN)
//! funnel server --host 0.0.0.0 --port 8080
//!
//! # One-off fetch into a CSV table
//! funnel fetch -o funnel.csv
//!
//! # Offline build and summary
//! funnel build -i deals.json -o funnel.csv
//! funnel summary -i funnel.csv --from 2024-01-01 --to 2024-01-31
//! ```

use clap::Parser;
use funnel::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing; FUNNEL_LOG_FORMAT=json switches to JSON lines.
    let log_format = std::env::var("FUNNEL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "funnel=debug,funnel_core=debug,tower_http=debug"
    } else {
        "funnel=info,tower_http=info"
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
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Display startup banner
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Funnel startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗██╗   ██╗███╗   ██╗███╗   ██╗███████╗██╗
  ██╔════╝██║   ██║████╗  ██║████╗  ██║██╔════╝██║
  █████╗  ██║   ██║██╔██╗ ██║██╔██╗ ██║█████╗  ██║
  ██╔══╝  ██║   ██║██║╚██╗██║██║╚██╗██║██╔══╝  ██║
  ██║     ╚██████╔╝██║ ╚████║██║ ╚████║███████╗███████╗
  ╚═╝      ╚═════╝ ╚═╝  ╚═══╝╚═╝  ╚═══╝╚══════╝╚══════╝

  Sales Funnel Server v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
