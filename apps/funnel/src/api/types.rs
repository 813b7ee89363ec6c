//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use crate::cache::RefreshReport;
use crate::config::ReportSettings;
use chrono::{DateTime, Days, NaiveDate, Utc};
use funnel_core::{DailyRevenue, DateKey, DealStatus, FunnelFilter, StageId, StageInterval};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Cache status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `None` until the first successful refresh.
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub stale: bool,
    pub staleness_secs: u64,
    pub row_count: usize,
    pub deal_count: usize,
    pub fetches: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

// =============================================================================
// FUNNEL QUERY
// =============================================================================

/// Query parameters shared by the read routes.
///
/// `owner` and `status` take comma-separated lists; `all` (or an empty
/// value) means no restriction. `pipeline_id=all` lifts the dashboard's
/// default pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelQuery {
    pub owner: Option<String>,
    pub status: Option<String>,
    pub pipeline_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub date_key: Option<String>,
}

fn list(raw: Option<&str>) -> Vec<&str> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
            .collect()
    })
    .unwrap_or_default()
}

impl FunnelQuery {
    /// Filter from the explicit parameters only.
    pub fn to_filter(&self, report: &ReportSettings) -> Result<FunnelFilter, String> {
        let mut filter = FunnelFilter::new().keyed_by(match self.date_key.as_deref() {
            Some(raw) => raw.parse::<DateKey>().map_err(|e| e.to_string())?,
            None => report.date_key,
        });

        for owner in list(self.owner.as_deref()) {
            filter = filter.owner(owner);
        }
        for status in list(self.status.as_deref()) {
            filter = filter.status(status.parse::<DealStatus>().map_err(|e| e.to_string())?);
        }
        filter.pipeline_id = match self.pipeline_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(p) if p.eq_ignore_ascii_case("all") => None,
            Some(p) => Some(
                p.parse::<i64>()
                    .map_err(|_| format!("Invalid pipeline_id: {p:?}"))?,
            ),
        };
        filter.from = self.from;
        filter.to = self.to;

        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(format!("from ({from}) is after to ({to})"));
            }
        }
        Ok(filter)
    }

    /// Filter with the dashboard defaults filled in: the configured pipeline
    /// and, when no dates are given, the last `window_days` up to `today`.
    pub fn to_dashboard_filter(
        &self,
        report: &ReportSettings,
        today: NaiveDate,
    ) -> Result<FunnelFilter, String> {
        let mut filter = self.to_filter(report)?;
        if self.pipeline_id.is_none() {
            filter.pipeline_id = report.pipeline_id;
        }
        if self.from.is_none() && self.to.is_none() {
            let days = Days::new(report.window_days.max(0) as u64);
            filter.from = Some(today.checked_sub_days(days).unwrap_or(NaiveDate::MIN));
            filter.to = Some(today);
        }
        Ok(filter)
    }
}

/// `POST /refresh` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
}

// =============================================================================
// FUNNEL RESPONSES
// =============================================================================

/// Funnel table rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelResponse {
    pub last_refresh_time: Option<DateTime<Utc>>,
    /// Set when the rows are older than they should be.
    pub stale_warning: Option<String>,
    pub row_count: usize,
    pub deal_count: usize,
    pub rows: Vec<StageInterval>,
}

/// One stage of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCountJson {
    pub stage_id: StageId,
    pub label: Option<String>,
    pub current: usize,
    pub reached: usize,
}

/// Dashboard summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub stale_warning: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub pipeline_id: Option<i64>,
    pub stages: Vec<StageCountJson>,
    /// Won deals per day.
    pub revenue: Vec<DailyRevenue>,
    pub total_revenue: f64,
    pub owners: Vec<String>,
}

// =============================================================================
// REFRESH RESPONSE
// =============================================================================

/// `POST /refresh` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
    /// `refreshed`, `joined` or `fresh`.
    pub outcome: Option<String>,
    pub report: Option<RefreshReport>,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RefreshResponse {
    /// Create an error response.
    #[must_use]
    pub fn error(msg: impl Into<String>, last_refresh_time: Option<DateTime<Utc>>) -> Self {
        Self {
            success: false,
            outcome: None,
            report: None,
            last_refresh_time,
            error: Some(msg.into()),
        }
    }
}

/// Generic error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}
