//! # API Endpoint Handlers
//!
//! Read routes go through `get_table()`, so a stale table is refreshed on
//! demand. When that refresh fails they still answer, from the previous
//! table, with `stale_warning` set.

use super::{
    AppState,
    types::{
        ErrorResponse, FunnelQuery, FunnelResponse, HealthResponse, RefreshQuery,
        RefreshResponse, StageCountJson, StatusResponse, SummaryResponse,
    },
};
use crate::error::RefreshError;
use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use funnel_core::{FunnelSummary, FunnelTable, filter_table, table_to_csv};
use std::sync::Arc;

// =============================================================================
// HELPERS
// =============================================================================

/// Current table plus a warning when it could not be brought up to date.
async fn current_table(state: &AppState) -> (Arc<FunnelTable>, Option<String>) {
    match state.cache.get_table().await {
        Ok(table) => {
            let snapshot = state.cache.snapshot().await;
            let warning = snapshot.last_error.map(|failure| {
                format!(
                    "Last refresh failed at {}: {}",
                    failure.at.format("%Y-%m-%d %H:%M:%S"),
                    failure.message
                )
            });
            (table, warning)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Serving previous funnel table");
            let warning = match state.cache.last_refresh_time().await {
                Some(at) => format!(
                    "{e}; showing data from {}",
                    at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => format!("{e}; no data loaded yet"),
            };
            (state.cache.table().await, Some(warning))
        }
    }
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Cache status. Never triggers a refresh.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.cache.snapshot().await;

    let response = StatusResponse {
        last_refresh_time: snapshot.last_refresh_time,
        stale: snapshot.stale,
        staleness_secs: state.cache.staleness().as_secs(),
        row_count: snapshot.table.len(),
        deal_count: snapshot.table.deal_count(),
        fetches: snapshot.fetches,
        last_error_at: snapshot.last_error.as_ref().map(|f| f.at),
        last_error: snapshot.last_error.map(|f| f.message),
    };

    (StatusCode::OK, Json(response))
}

// =============================================================================
// FUNNEL HANDLERS
// =============================================================================

/// Funnel rows, filtered by the explicit query parameters.
pub async fn funnel_handler(
    State(state): State<AppState>,
    Query(query): Query<FunnelQuery>,
) -> Response {
    let filter = match query.to_filter(&state.report) {
        Ok(f) => f,
        Err(e) => return bad_request(e),
    };

    let (table, stale_warning) = current_table(&state).await;
    let filtered = filter_table(&table, &filter);

    let response = FunnelResponse {
        last_refresh_time: state.cache.last_refresh_time().await,
        stale_warning,
        row_count: filtered.len(),
        deal_count: filtered.deal_count(),
        rows: filtered.into_rows(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Stage counts and won revenue, with the dashboard defaults applied.
pub async fn summary_handler(
    State(state): State<AppState>,
    Query(query): Query<FunnelQuery>,
) -> Response {
    let today = Utc::now().date_naive();
    let filter = match query.to_dashboard_filter(&state.report, today) {
        Ok(f) => f,
        Err(e) => return bad_request(e),
    };

    let (table, stale_warning) = current_table(&state).await;
    let summary = FunnelSummary::compute(&table, &filter, &state.report.stage_order());

    let stages = summary
        .stage_counts
        .into_iter()
        .map(|c| StageCountJson {
            label: state.report.label(&c.stage_id).map(str::to_string),
            stage_id: c.stage_id,
            current: c.current,
            reached: c.reached,
        })
        .collect();

    let response = SummaryResponse {
        last_refresh_time: state.cache.last_refresh_time().await,
        stale_warning,
        from: filter.from,
        to: filter.to,
        pipeline_id: filter.pipeline_id,
        stages,
        revenue: summary.revenue,
        total_revenue: summary.total_revenue,
        owners: summary.owners,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// The whole table as CSV, in the persisted layout.
pub async fn csv_handler(State(state): State<AppState>) -> Response {
    let (table, _) = current_table(&state).await;

    match table_to_csv(&table) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"funnel.csv\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("CSV export failed: {e}"))),
        )
            .into_response(),
    }
}

// =============================================================================
// REFRESH HANDLER
// =============================================================================

/// Refresh if stale, or unconditionally with `?force=true`.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Response {
    let result = if query.force {
        state.cache.force_refresh().await
    } else {
        state.cache.refresh().await
    };
    let last_refresh_time = state.cache.last_refresh_time().await;

    match result {
        Ok(outcome) => {
            let response = RefreshResponse {
                success: true,
                outcome: Some(outcome.as_str().to_string()),
                report: outcome.report().cloned(),
                last_refresh_time,
                error: None,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e @ RefreshError::Fetch(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(RefreshResponse::error(e.to_string(), last_refresh_time)),
        )
            .into_response(),
        Err(e @ RefreshError::Busy) => (
            StatusCode::CONFLICT,
            Json(RefreshResponse::error(e.to_string(), last_refresh_time)),
        )
            .into_response(),
    }
}
