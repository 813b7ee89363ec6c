//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api::{self, AppState, FunnelQuery};
use crate::cache::RefreshCache;
use crate::config::Config;
use crate::crm::{CrmClient, FetchedDeals, JsonFileSource, log_skipped};
use crate::error::AppError;
use crate::persistence::{load_table, merge_into_file, save_table};
use crate::scheduler::spawn_refresh_timer;
use funnel_core::{FunnelBuild, FunnelSummary, FunnelTable, build_funnel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Output file of `fetch` when neither `--output` nor `cache.csv_path` is set.
const DEFAULT_CSV_PATH: &str = "funnel.csv";

/// Record and deal counts of one fetch-and-build.
struct BuildCounts {
    /// Raw records read from the source.
    records: usize,
    /// Records that could not be mapped to a deal.
    dropped: usize,
    /// Mapped deals the builder accepted.
    accepted: usize,
}

impl BuildCounts {
    fn skipped(&self) -> usize {
        self.records - self.accepted
    }
}

/// Build the fetched deals, logging every skipped deal.
fn build_fetched(fetched: &FetchedDeals) -> (FunnelBuild, BuildCounts) {
    let build = build_funnel(&fetched.deals);
    for err in &build.skipped {
        log_skipped(err);
    }
    let counts = BuildCounts {
        records: fetched.records(),
        dropped: fetched.dropped.len(),
        accepted: build.accepted(fetched.deals.len()),
    };
    (build, counts)
}

fn print_build_report(
    json_mode: bool,
    output: &Path,
    counts: &BuildCounts,
    build: &FunnelBuild,
    written: &FunnelTable,
    elapsed_ms: u128,
) {
    if json_mode {
        let report = serde_json::json!({
            "output": output.to_string_lossy(),
            "records": counts.records,
            "accepted": counts.accepted,
            "unmappable": counts.dropped,
            "skipped": counts.skipped(),
            "rows": build.table.len(),
            "rows_written": written.len(),
            "elapsed_ms": elapsed_ms as u64,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        return;
    }

    println!("Records:      {}", counts.records);
    println!("Accepted:     {}", counts.accepted);
    println!("Skipped:      {} ({} unmappable)", counts.skipped(), counts.dropped);
    println!("Rows built:   {}", build.table.len());
    println!("Rows written: {}", written.len());
    println!("Output:       {}", output.display());
    println!("Elapsed:      {} ms", elapsed_ms);
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the refresh timer and the HTTP server.
pub async fn cmd_server(config: &Config, host: &str, port: u16) -> Result<(), AppError> {
    let client = CrmClient::new(&config.crm, config.require_api_token()?)?;
    let mut cache = RefreshCache::new(Arc::new(client), config.cache.staleness());

    if let Some(path) = &config.cache.csv_path {
        match load_table(path)? {
            Some(table) => {
                tracing::info!(
                    path = %path.display(),
                    rows = table.len(),
                    "Serving persisted table until the first refresh"
                );
                cache = cache.with_initial_table(table);
            }
            None => tracing::info!(path = %path.display(), "No persisted table yet"),
        }
        cache = cache.with_csv_path(path);
    }

    let cache = Arc::new(cache);
    let timer = spawn_refresh_timer(cache.clone(), config.cache.refresh_interval());
    let state = AppState::new(cache, config.report.clone());

    println!("Funnel Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:      {}", host);
    println!("  Port:      {}", port);
    println!("  CRM:       {}", config.crm.base_url);
    println!("  Staleness: {}s", config.cache.staleness_secs);
    println!("  Interval:  {}s", config.cache.refresh_interval_secs);
    match &config.cache.csv_path {
        Some(p) => println!("  CSV:       {}", p.display()),
        None => println!("  CSV:       (disabled)"),
    }
    println!();
    println!("Endpoints:");
    println!("  GET  /health         - Health check");
    println!("  GET  /status         - Cache status");
    println!("  GET  /funnel         - Funnel rows");
    println!("  GET  /funnel/summary - Stage counts and revenue");
    println!("  GET  /funnel.csv     - Funnel table as CSV");
    println!("  POST /refresh        - Refresh the table");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    let result = api::run_server(&addr, state, &config.api).await;
    timer.abort();
    result
}

// =============================================================================
// FETCH COMMAND
// =============================================================================

/// One CRM fetch, written to CSV (merged unless `replace`).
pub async fn cmd_fetch(
    config: &Config,
    output: Option<PathBuf>,
    replace: bool,
    json_mode: bool,
) -> Result<(), AppError> {
    let output = output
        .or_else(|| config.cache.csv_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_PATH));
    let client = CrmClient::new(&config.crm, config.require_api_token()?)?;

    let started = Instant::now();
    let (build, counts) = build_fetched(&client.fetch_deals().await?);

    let written = if replace {
        save_table(&output, &build.table)?;
        build.table.clone()
    } else {
        merge_into_file(&output, &build.table)?
    };

    print_build_report(
        json_mode,
        &output,
        &counts,
        &build,
        &written,
        started.elapsed().as_millis(),
    );
    Ok(())
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Offline transform of a JSON deal file into a CSV table.
pub async fn cmd_build(input: &Path, output: &Path, json_mode: bool) -> Result<(), AppError> {
    let source = JsonFileSource::new(input);
    let started = Instant::now();
    let (build, counts) = build_fetched(&source.fetch_deals().await?);

    save_table(output, &build.table)?;
    print_build_report(
        json_mode,
        output,
        &counts,
        &build,
        &build.table,
        started.elapsed().as_millis(),
    );
    Ok(())
}

// =============================================================================
// SUMMARY COMMAND
// =============================================================================

/// Print stage counts and won revenue of a CSV table.
pub fn cmd_summary(
    config: &Config,
    input: &Path,
    query: &FunnelQuery,
    json_mode: bool,
) -> Result<(), AppError> {
    let table = load_table(input)?
        .ok_or_else(|| AppError::Io(format!("'{}' does not exist", input.display())))?;

    let mut filter = query.to_filter(&config.report).map_err(AppError::Config)?;
    if query.pipeline_id.is_none() {
        filter.pipeline_id = config.report.pipeline_id;
    }
    let summary = FunnelSummary::compute(&table, &filter, &config.report.stage_order());

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Funnel Summary");
    println!("==============");
    println!("Table:    {}", input.display());
    match filter.pipeline_id {
        Some(p) => println!("Pipeline: {}", p),
        None => println!("Pipeline: all"),
    }
    println!();
    println!("{:<14} {:<16} {:>8} {:>8}", "Stage", "Label", "Current", "Reached");
    for count in &summary.stage_counts {
        println!(
            "{:<14} {:<16} {:>8} {:>8}",
            count.stage_id.as_str(),
            config.report.label(&count.stage_id).unwrap_or("-"),
            count.current,
            count.reached
        );
    }
    println!();
    println!("Won revenue by day:");
    if summary.revenue.is_empty() {
        println!("  (none)");
    }
    for day in &summary.revenue {
        println!("  {}  {:>12.2}  ({} deals)", day.date, day.revenue, day.deals);
    }
    println!();
    println!("Total won revenue: {:.2}", summary.total_revenue);
    println!("Owners: {}", summary.owners.join(", "));

    Ok(())
}
