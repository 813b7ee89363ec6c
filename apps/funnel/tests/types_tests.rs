//! Unit tests for API types serialization and query parsing.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::NaiveDate;
use funnel::api::{FunnelQuery, HealthResponse, RefreshQuery, RefreshResponse, StatusResponse};
use funnel::config::ReportSettings;
use funnel_core::{DateKey, DealStatus};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =============================================================================
// HEALTH / STATUS RESPONSES
// =============================================================================

#[test]
fn test_health_response_default() {
    let health = HealthResponse::default();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[test]
fn test_status_response_serializes_missing_refresh_as_null() {
    let status = StatusResponse {
        last_refresh_time: None,
        stale: true,
        staleness_secs: 3600,
        row_count: 0,
        deal_count: 0,
        fetches: 0,
        last_error: None,
        last_error_at: None,
    };

    let json = serde_json::to_string(&status).unwrap();
    assert!(json.contains("\"last_refresh_time\":null"));
    assert!(json.contains("\"stale\":true"));
}

#[test]
fn test_refresh_error_response() {
    let response = RefreshResponse::error("Refresh failed: Rate limited by CRM", None);
    assert!(!response.success);
    assert!(response.outcome.is_none());

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"success\":false"));
    assert!(json.contains("Rate limited"));
}

// =============================================================================
// QUERY PARSING
// =============================================================================

#[test]
fn test_empty_query_matches_everything() {
    let filter = FunnelQuery::default()
        .to_filter(&ReportSettings::default())
        .unwrap();

    assert!(filter.owners.is_empty());
    assert!(filter.statuses.is_empty());
    assert_eq!(filter.pipeline_id, None);
    assert_eq!(filter.from, None);
    assert_eq!(filter.date_key, DateKey::Created);
}

#[test]
fn test_comma_lists_and_all() {
    let query = FunnelQuery {
        owner: Some("Ana, Bruno,all".to_string()),
        status: Some("won,LOST".to_string()),
        ..Default::default()
    };
    let filter = query.to_filter(&ReportSettings::default()).unwrap();

    assert_eq!(filter.owners.len(), 2);
    assert!(filter.owners.contains("Bruno"));
    assert!(filter.statuses.contains(&DealStatus::Won));
    assert!(filter.statuses.contains(&DealStatus::Lost));
}

#[test]
fn test_pipeline_parsing() {
    let report = ReportSettings::default();
    let with = |p: &str| FunnelQuery {
        pipeline_id: Some(p.to_string()),
        ..Default::default()
    };

    assert_eq!(with("3").to_filter(&report).unwrap().pipeline_id, Some(3));
    assert_eq!(with("all").to_filter(&report).unwrap().pipeline_id, None);
    assert!(with("three").to_filter(&report).is_err());
}

#[test]
fn test_date_key_override() {
    let query = FunnelQuery {
        date_key: Some("stage_exit".to_string()),
        ..Default::default()
    };
    let filter = query.to_filter(&ReportSettings::default()).unwrap();
    assert_eq!(filter.date_key, DateKey::StageExit);

    let bad = FunnelQuery {
        date_key: Some("closed".to_string()),
        ..Default::default()
    };
    assert!(bad.to_filter(&ReportSettings::default()).is_err());
}

#[test]
fn test_dashboard_filter_defaults() {
    let report = ReportSettings::default();
    let today = date(2024, 3, 10);

    let filter = FunnelQuery::default()
        .to_dashboard_filter(&report, today)
        .unwrap();
    assert_eq!(filter.pipeline_id, Some(1));
    assert_eq!(filter.from, Some(date(2024, 3, 3)));
    assert_eq!(filter.to, Some(today));
}

#[test]
fn test_dashboard_filter_keeps_explicit_values() {
    let report = ReportSettings::default();
    let query = FunnelQuery {
        pipeline_id: Some("all".to_string()),
        from: Some(date(2024, 1, 1)),
        ..Default::default()
    };

    let filter = query.to_dashboard_filter(&report, date(2024, 3, 10)).unwrap();
    assert_eq!(filter.pipeline_id, None);
    assert_eq!(filter.from, Some(date(2024, 1, 1)));
    assert_eq!(filter.to, None);
}

#[test]
fn test_refresh_query_defaults_to_not_forced() {
    let query: RefreshQuery = serde_json::from_str("{}").unwrap();
    assert!(!query.force);
}
