//! # Refresh Cache
//!
//! Holds the most recent funnel table and replaces it from the deal source
//! when it goes stale.
//!
//! ## Guarantees
//!
//! - Readers see either the whole previous table or the whole new one: the
//!   table is an `Arc` swapped under a short write lock.
//! - At most one fetch runs at a time. Callers that arrive while a refresh
//!   is in flight wait for it and receive its outcome instead of fetching
//!   again.
//! - A failed fetch leaves the table and `last_refresh_time` untouched.
//! - Dropping a refresh future before it commits leaves the state untouched;
//!   the next caller starts a new fetch.
//!
//! Staleness is measured on tokio's monotonic clock; `last_refresh_time` is
//! the wall-clock time reported to users.

use crate::crm::{DealSource, log_skipped};
use crate::error::{FetchError, RefreshError};
use crate::persistence;
use chrono::{DateTime, Utc};
use funnel_core::{FunnelTable, build_funnel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;

// =============================================================================
// PUBLIC TYPES
// =============================================================================

/// Whether a refresh honours the staleness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Fetch only if the table is stale.
    IfStale,
    /// Fetch regardless of age.
    Force,
}

/// Result of one successful fetch-and-build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Deals turned into intervals.
    pub deals: usize,
    pub rows: usize,
    /// Deals rejected by the builder.
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub refreshed_at: DateTime<Utc>,
}

/// What a refresh call did.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// This call fetched and installed a new table.
    Refreshed(RefreshReport),
    /// This call waited on a refresh already in flight.
    Joined(RefreshReport),
    /// The table was fresh; nothing was fetched.
    Fresh,
}

impl RefreshOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed(_) => "refreshed",
            RefreshOutcome::Joined(_) => "joined",
            RefreshOutcome::Fresh => "fresh",
        }
    }

    #[must_use]
    pub fn report(&self) -> Option<&RefreshReport> {
        match self {
            RefreshOutcome::Refreshed(r) | RefreshOutcome::Joined(r) => Some(r),
            RefreshOutcome::Fresh => None,
        }
    }
}

/// The most recent failed refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub table: Arc<FunnelTable>,
    /// `None` until the first successful refresh.
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub stale: bool,
    /// Set when the latest refresh attempt failed.
    pub last_error: Option<RefreshFailure>,
    /// Fetches started since creation.
    pub fetches: u64,
}

// =============================================================================
// REFRESH CACHE
// =============================================================================

struct CacheState {
    table: Arc<FunnelTable>,
    last_refresh_time: Option<DateTime<Utc>>,
    refreshed_at: Option<Instant>,
    last_error: Option<RefreshFailure>,
}

/// Staleness-driven cache of the funnel table.
pub struct RefreshCache {
    source: Arc<dyn DealSource>,
    staleness: Duration,
    csv_path: Option<PathBuf>,
    state: RwLock<CacheState>,
    /// Held for the duration of a refresh; holds the last finished outcome.
    refresh_slot: Mutex<Option<Result<RefreshReport, FetchError>>>,
    /// Bumped each time a fetch finishes (success or failure).
    completed: AtomicU64,
    fetches: AtomicU64,
}

impl RefreshCache {
    /// Create an empty cache. The table is stale until the first refresh.
    pub fn new(source: Arc<dyn DealSource>, staleness: Duration) -> Self {
        Self {
            source,
            staleness,
            csv_path: None,
            state: RwLock::new(CacheState {
                table: Arc::new(FunnelTable::new()),
                last_refresh_time: None,
                refreshed_at: None,
                last_error: None,
            }),
            refresh_slot: Mutex::new(None),
            completed: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Merge every successfully built table into this CSV file.
    #[must_use]
    pub fn with_csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_path = Some(path.into());
        self
    }

    /// Serve `table` until the first refresh. It does not count as a
    /// refresh: the cache stays stale and `last_refresh_time` stays `None`.
    #[must_use]
    pub fn with_initial_table(mut self, table: FunnelTable) -> Self {
        self.state.get_mut().table = Arc::new(table);
        self
    }

    #[must_use]
    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Whether the table is older than the threshold (or was never fetched).
    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        self.stale_at(&state)
    }

    fn stale_at(&self, state: &CacheState) -> bool {
        state
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= self.staleness)
    }

    /// The current table, without refreshing.
    pub async fn table(&self) -> Arc<FunnelTable> {
        self.state.read().await.table.clone()
    }

    /// Wall-clock time of the last successful refresh.
    pub async fn last_refresh_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_refresh_time
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.read().await;
        CacheSnapshot {
            table: state.table.clone(),
            last_refresh_time: state.last_refresh_time,
            stale: self.stale_at(&state),
            last_error: state.last_error.clone(),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }

    /// The current table, refreshed first if it is stale.
    ///
    /// A failed refresh is returned as an error; the previous table is still
    /// available through [`RefreshCache::table`].
    pub async fn get_table(&self) -> Result<Arc<FunnelTable>, RefreshError> {
        if self.is_stale().await {
            self.refresh().await?;
        }
        Ok(self.table().await)
    }

    /// Refresh if stale, waiting on any refresh already in flight.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        self.run(RefreshMode::IfStale).await
    }

    /// Refresh regardless of age, waiting on any refresh already in flight.
    pub async fn force_refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        self.run(RefreshMode::Force).await
    }

    /// Refresh without waiting: `RefreshError::Busy` if one is in flight.
    pub async fn try_refresh(&self, mode: RefreshMode) -> Result<RefreshOutcome, RefreshError> {
        let observed = self.completed.load(Ordering::Acquire);
        let slot = self
            .refresh_slot
            .try_lock()
            .map_err(|_| RefreshError::Busy)?;
        self.run_locked(slot, observed, mode).await
    }

    async fn run(&self, mode: RefreshMode) -> Result<RefreshOutcome, RefreshError> {
        let observed = self.completed.load(Ordering::Acquire);
        let slot = self.refresh_slot.lock().await;
        self.run_locked(slot, observed, mode).await
    }

    async fn run_locked(
        &self,
        mut slot: MutexGuard<'_, Option<Result<RefreshReport, FetchError>>>,
        observed: u64,
        mode: RefreshMode,
    ) -> Result<RefreshOutcome, RefreshError> {
        // A fetch finished while we waited for the slot: share its outcome.
        if self.completed.load(Ordering::Acquire) != observed {
            if let Some(last) = slot.as_ref() {
                return last
                    .clone()
                    .map(RefreshOutcome::Joined)
                    .map_err(RefreshError::Fetch);
            }
        }

        if mode == RefreshMode::IfStale && !self.is_stale().await {
            return Ok(RefreshOutcome::Fresh);
        }

        let outcome = self.fetch_and_install().await;
        *slot = Some(outcome.clone());
        self.completed.fetch_add(1, Ordering::Release);

        outcome
            .map(RefreshOutcome::Refreshed)
            .map_err(RefreshError::Fetch)
    }

    /// Fetch, build, and swap in the new table.
    async fn fetch_and_install(&self) -> Result<RefreshReport, FetchError> {
        let started = Instant::now();
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            event = "refresh_start",
            source = %self.source.describe(),
            "Refreshing funnel table"
        );

        let deals = match self.source.fetch_all_deals().await {
            Ok(deals) => deals,
            Err(e) => {
                tracing::warn!(
                    event = "refresh_failed",
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Refresh failed, keeping previous table"
                );
                self.state.write().await.last_error = Some(RefreshFailure {
                    message: e.to_string(),
                    at: Utc::now(),
                });
                return Err(e);
            }
        };

        let build = build_funnel(&deals);
        for err in &build.skipped {
            log_skipped(err);
        }

        let report = RefreshReport {
            deals: build.accepted(deals.len()),
            rows: build.table.len(),
            skipped: build.skipped.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            refreshed_at: Utc::now(),
        };
        let table = Arc::new(build.table);

        {
            let mut state = self.state.write().await;
            state.table = table.clone();
            state.last_refresh_time = Some(report.refreshed_at);
            state.refreshed_at = Some(Instant::now());
            state.last_error = None;
        }

        tracing::info!(
            event = "refresh_done",
            deals = report.deals,
            rows = report.rows,
            skipped = report.skipped,
            elapsed_ms = report.elapsed_ms,
            "Funnel table refreshed"
        );

        if let Some(path) = &self.csv_path {
            persist(path.clone(), table).await;
        }

        Ok(report)
    }
}

/// Merge the table into the CSV file; failures are logged, not propagated.
async fn persist(path: PathBuf, table: Arc<FunnelTable>) {
    let shown = path.display().to_string();
    let result =
        tokio::task::spawn_blocking(move || persistence::merge_into_file(&path, &table)).await;

    match result {
        Ok(Ok(merged)) => {
            tracing::debug!(path = %shown, rows = merged.len(), "Funnel table persisted");
        }
        Ok(Err(e)) => {
            tracing::error!(path = %shown, error = %e, "Cannot persist funnel table");
        }
        Err(e) => {
            tracing::error!(path = %shown, error = %e, "Persistence task failed");
        }
    }
}
