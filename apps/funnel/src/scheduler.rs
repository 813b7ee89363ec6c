//! # Refresh Timer
//!
//! Background task that refreshes the cache on a fixed period. The first
//! tick fires immediately, so the server loads data at startup.
//!
//! Ticks never queue behind a refresh already in flight: a busy cache skips
//! the tick.

use crate::cache::{RefreshCache, RefreshMode, RefreshOutcome};
use crate::error::RefreshError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn the periodic refresh task. Abort the handle to stop it.
pub fn spawn_refresh_timer(cache: Arc<RefreshCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(period_secs = period.as_secs(), "Refresh timer started");

        loop {
            ticker.tick().await;
            refresh_tick(&cache).await;
        }
    })
}

/// One timer tick. Returns the outcome, or `None` when the tick was skipped
/// or failed.
pub async fn refresh_tick(cache: &RefreshCache) -> Option<RefreshOutcome> {
    match cache.try_refresh(RefreshMode::Force).await {
        Ok(outcome) => Some(outcome),
        Err(RefreshError::Busy) => {
            tracing::debug!(event = "refresh_skipped", "Refresh in flight, skipping tick");
            None
        }
        Err(RefreshError::Fetch(e)) => {
            tracing::warn!(event = "refresh_tick_failed", error = %e, "Timed refresh failed");
            None
        }
    }
}
