//! Integration tests for the Funnel HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.
//! The cache is backed by an in-process stub deal source.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderValue, Request, StatusCode, header};
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use funnel::api::{
    AppState, ErrorResponse, FunnelResponse, HealthResponse, RefreshResponse, StatusResponse,
    SummaryResponse, create_router,
};
use funnel::cache::RefreshCache;
use funnel::config::{ApiSettings, ReportSettings};
use funnel::crm::{DealSource, FetchFuture};
use funnel::error::FetchError;
use funnel_core::{Deal, DealId, DealStatus, StageId, table_from_csv};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Deal source returning a fixed set, or failing while `failing` is set.
struct FixedSource {
    deals: Vec<Deal>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl DealSource for FixedSource {
    fn fetch_all_deals(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(FetchError::ConnectionFailed("crm.test".into()))
            } else {
                Ok(self.deals.clone())
            }
        })
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

fn deal(id: u64, day: u32, owner: &str, status: DealStatus, value: f64) -> Deal {
    Deal::new(
        DealId(id),
        Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap(),
    )
    .with_value(value)
    .with_status(status)
    .with_owner(owner)
    .with_pipeline(1)
}

fn sample_deals() -> Vec<Deal> {
    vec![
        deal(1, 1, "Ana", DealStatus::Open, 1000.0)
            .with_stage("1", 3600)
            .with_stage("2", 7200),
        deal(2, 2, "Bruno", DealStatus::Won, 500.0)
            .with_stage("1", 60)
            .with_stage("2", 60)
            .with_stage("3", 60),
        deal(3, 2, "Ana", DealStatus::Won, 250.0).with_stage("1", 60),
    ]
}

fn fixed_source(failing: bool) -> Arc<FixedSource> {
    Arc::new(FixedSource {
        deals: sample_deals(),
        failing: AtomicBool::new(failing),
        calls: AtomicUsize::new(0),
    })
}

fn report_settings() -> ReportSettings {
    serde_json::from_value(serde_json::json!({
        "stages": [
            { "id": "1", "label": "Started" },
            { "id": "2", "label": "Scheduled" },
            { "id": "3", "label": "Proposal" }
        ]
    }))
    .unwrap()
}

fn state_over(source: &Arc<FixedSource>) -> AppState {
    let cache = RefreshCache::new(source.clone(), Duration::from_secs(3600));
    AppState::new(Arc::new(cache), report_settings())
}

/// Create a test server over the sample deals.
fn create_test_server() -> (TestServer, Arc<FixedSource>) {
    let source = fixed_source(false);
    let router = create_router(state_over(&source), &ApiSettings::default());
    (TestServer::new(router).unwrap(), source)
}

/// Create a test server with API key authentication enabled.
fn create_auth_test_server(key: &str) -> TestServer {
    let api = ApiSettings {
        api_key: Some(key.to_string()),
        cors_origins: Vec::new(),
    };
    TestServer::new(create_router(state_over(&fixed_source(false)), &api)).unwrap()
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_before_first_refresh() {
    let (server, source) = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert!(status.last_refresh_time.is_none());
    assert!(status.stale);
    assert_eq!(status.row_count, 0);
    assert_eq!(status.staleness_secs, 3600);
    // Status never triggers a fetch.
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_status_after_read() {
    let (server, _) = create_test_server();

    server.get("/funnel").await.assert_status_ok();
    let status: StatusResponse = server.get("/status").await.json();

    assert!(status.last_refresh_time.is_some());
    assert!(!status.stale);
    assert_eq!(status.row_count, 6);
    assert_eq!(status.deal_count, 3);
    assert_eq!(status.fetches, 1);
    assert!(status.last_error.is_none());
}

// =============================================================================
// FUNNEL ROWS
// =============================================================================

#[tokio::test]
async fn test_funnel_rows_are_contiguous() {
    let (server, source) = create_test_server();

    let response = server.get("/funnel").await;

    response.assert_status_ok();
    let body: FunnelResponse = response.json();
    assert_eq!(body.row_count, 6);
    assert!(body.stale_warning.is_none());
    assert!(body.last_refresh_time.is_some());

    let first: Vec<_> = body.rows.iter().filter(|r| r.deal_id == DealId(1)).collect();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].end_time, first[1].start_time);
    assert_eq!(first[1].stage_id, StageId::from("2"));

    // Second read within the threshold is served from the cache.
    server.get("/funnel").await.assert_status_ok();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_funnel_filters_by_owner_and_status() {
    let (server, _) = create_test_server();

    let response = server
        .get("/funnel")
        .add_query_param("owner", "Ana")
        .add_query_param("status", "won")
        .await;

    response.assert_status_ok();
    let body: FunnelResponse = response.json();
    assert_eq!(body.deal_count, 1);
    assert_eq!(body.rows[0].deal_id, DealId(3));
}

#[tokio::test]
async fn test_funnel_filters_by_date() {
    let (server, _) = create_test_server();

    let response = server
        .get("/funnel")
        .add_query_param("from", "2024-01-02")
        .add_query_param("to", "2024-01-02")
        .await;

    let body: FunnelResponse = response.json();
    assert_eq!(body.deal_count, 2);
}

#[tokio::test]
async fn test_funnel_rejects_unknown_status() {
    let (server, _) = create_test_server();

    let response = server.get("/funnel").add_query_param("status", "archived").await;

    response.assert_status_bad_request();
    let body: ErrorResponse = response.json();
    assert!(body.error.contains("archived"));
}

#[tokio::test]
async fn test_funnel_rejects_inverted_range() {
    let (server, _) = create_test_server();

    let response = server
        .get("/funnel")
        .add_query_param("from", "2024-02-01")
        .add_query_param("to", "2024-01-01")
        .await;

    response.assert_status_bad_request();
}

// =============================================================================
// SUMMARY
// =============================================================================

#[tokio::test]
async fn test_summary_counts_and_revenue() {
    let (server, _) = create_test_server();

    let response = server
        .get("/funnel/summary")
        .add_query_param("from", "2024-01-01")
        .add_query_param("to", "2024-01-31")
        .await;

    response.assert_status_ok();
    let summary: SummaryResponse = response.json();
    assert_eq!(summary.pipeline_id, Some(1));
    assert_eq!(summary.stages.len(), 3);
    assert_eq!(summary.stages[0].label.as_deref(), Some("Started"));
    // Stage counts cover open deals only; revenue covers won deals.
    assert_eq!(summary.stages[0].reached, 1);
    assert_eq!(summary.stages[0].current, 0);
    assert_eq!(summary.stages[1].current, 1);
    assert_eq!(summary.stages[2].current, 0);
    assert_eq!(summary.total_revenue, 750.0);
    assert_eq!(summary.revenue.len(), 1);
    assert_eq!(summary.revenue[0].deals, 2);
    assert_eq!(summary.owners, vec!["Ana".to_string(), "Bruno".to_string()]);
}

#[tokio::test]
async fn test_summary_counts_requested_statuses() {
    let (server, _) = create_test_server();

    let response = server
        .get("/funnel/summary")
        .add_query_param("from", "2024-01-01")
        .add_query_param("to", "2024-01-31")
        .add_query_param("status", "open,won")
        .await;

    response.assert_status_ok();
    let summary: SummaryResponse = response.json();
    assert_eq!(summary.stages[0].reached, 3);
    assert_eq!(summary.stages[0].current, 1);
    assert_eq!(summary.stages[2].current, 1);
    assert_eq!(summary.total_revenue, 750.0);
}

#[tokio::test]
async fn test_summary_defaults_to_recent_window() {
    let (server, _) = create_test_server();

    let summary: SummaryResponse = server.get("/funnel/summary").await.json();

    let (from, to) = (summary.from.unwrap(), summary.to.unwrap());
    assert_eq!((to - from).num_days(), 7);
    // The sample deals are from 2024, outside the last week.
    assert_eq!(summary.total_revenue, 0.0);
}

// =============================================================================
// CSV EXPORT
// =============================================================================

#[tokio::test]
async fn test_csv_export() {
    let (server, _) = create_test_server();

    let response = server.get("/funnel.csv").await;

    response.assert_status_ok();
    let content_type = response
        .headers()
        .get("content-type")
        .expect("content-type header must be present")
        .to_str()
        .expect("content-type must be valid utf8")
        .to_string();
    assert!(content_type.starts_with("text/csv"));

    let body = response.text();
    assert!(body.starts_with("Deal ID,Stage ID,Start Date,End Date,Value,Status,Owner Name"));
    assert_eq!(table_from_csv(body.as_bytes()).unwrap().len(), 6);
}

// =============================================================================
// REFRESH
// =============================================================================

#[tokio::test]
async fn test_refresh_then_fresh() {
    let (server, source) = create_test_server();

    let first: RefreshResponse = server.post("/refresh").await.json();
    assert!(first.success);
    assert_eq!(first.outcome.as_deref(), Some("refreshed"));
    assert_eq!(first.report.unwrap().rows, 6);

    let second: RefreshResponse = server.post("/refresh").await.json();
    assert_eq!(second.outcome.as_deref(), Some("fresh"));
    assert!(second.report.is_none());

    let forced: RefreshResponse = server
        .post("/refresh")
        .add_query_param("force", "true")
        .await
        .json();
    assert_eq!(forced.outcome.as_deref(), Some("refreshed"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_refresh_failure_is_bad_gateway() {
    let source = fixed_source(true);
    let server =
        TestServer::new(create_router(state_over(&source), &ApiSettings::default())).unwrap();

    let response = server.post("/refresh").await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: RefreshResponse = response.json();
    assert!(!body.success);
    assert!(body.error.unwrap().contains("crm.test"));
}

#[tokio::test]
async fn test_reads_survive_failed_refresh() {
    let source = fixed_source(false);
    let server =
        TestServer::new(create_router(state_over(&source), &ApiSettings::default())).unwrap();

    server.post("/refresh").await.assert_status_ok();
    source.failing.store(true, Ordering::SeqCst);
    server
        .post("/refresh")
        .add_query_param("force", "true")
        .await
        .assert_status(StatusCode::BAD_GATEWAY);

    let response = server.get("/funnel").await;
    response.assert_status_ok();
    let body: FunnelResponse = response.json();
    assert_eq!(body.row_count, 6);
    assert!(body.stale_warning.unwrap().contains("Last refresh failed"));

    let status: StatusResponse = server.get("/status").await.json();
    assert!(status.last_error.is_some());
    assert!(status.last_refresh_time.is_some());
}

#[tokio::test]
async fn test_read_with_no_data_and_failing_crm() {
    let source = fixed_source(true);
    let server =
        TestServer::new(create_router(state_over(&source), &ApiSettings::default())).unwrap();

    let response = server.get("/funnel").await;

    response.assert_status_ok();
    let body: FunnelResponse = response.json();
    assert_eq!(body.row_count, 0);
    assert!(body.last_refresh_time.is_none());
    assert!(body.stale_warning.unwrap().contains("no data loaded yet"));
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_invalid_token_rejected() {
    let server = create_auth_test_server("correct-key");

    let response = server
        .get("/funnel")
        .add_header(
            header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let server = create_auth_test_server("correct-key");

    server.post("/refresh").await.assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_health_always_open() {
    let server = create_auth_test_server("correct-key");

    server.get("/health").await.assert_status_ok();
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_allows_localhost_by_default() {
    let router = create_router(state_over(&fixed_source(false)), &ApiSettings::default());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&HeaderValue::from_static("http://localhost:3000"))
    );
}

#[tokio::test]
async fn test_cors_rejects_unlisted_origin() {
    let api = ApiSettings {
        api_key: None,
        cors_origins: vec!["https://dash.example.com".to_string()],
    };
    let router = create_router(state_over(&fixed_source(false)), &api);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://evil.example.com")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
