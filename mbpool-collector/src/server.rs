// mbpool collector - snapshot HTTP server
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Read-only HTTP view of recent samples.
//!
//! - `GET /` critical lines, or everything with `?long=1`
//! - `GET /health` liveness
//! - `GET /metrics` Prometheus text format

use crate::metrics::encode_metrics;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Local};
use mbpool::{SnapshotSink, SnapshotView, TIME_FORMAT};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// State shared across handlers
pub struct AppState {
    pub snapshot: Arc<SnapshotSink>,
    pub started: DateTime<Local>,
    pub version: String,
}

impl AppState {
    pub fn new(snapshot: Arc<SnapshotSink>, version: impl Into<String>) -> Self {
        Self {
            snapshot,
            started: Local::now(),
            version: version.into(),
        }
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(snapshot_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// View selected by the `long` query parameter
pub fn requested_view(params: &HashMap<String, String>) -> SnapshotView {
    match params.get("long") {
        Some(v) if !v.is_empty() => SnapshotView::Full,
        _ => SnapshotView::Critical,
    }
}

/// Snapshot handler - header plus the selected view, newest first.
async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let header = format!(
        "now={} start={} {}\n\n",
        Local::now().format(TIME_FORMAT),
        state.started.format(TIME_FORMAT),
        state.version
    );
    header + &state.snapshot.render(requested_view(&params))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_secs: i64,
    blocks: usize,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.clone(),
        uptime_secs: (Local::now() - state.started).num_seconds(),
        blocks: state.snapshot.len(SnapshotView::Full),
    })
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4; charset=utf-8")],
        encode_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbpool::Sink;

    fn state() -> Arc<AppState> {
        let snapshot = Arc::new(SnapshotSink::new());
        snapshot.write_text("Nightmode from 22 to 5");
        snapshot.write_text("12ms, 3ms; **");
        Arc::new(AppState::new(snapshot, "test-1.0"))
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_requested_view() {
        assert_eq!(requested_view(&params(&[])), SnapshotView::Critical);
        assert_eq!(requested_view(&params(&[("long", "")])), SnapshotView::Critical);
        assert_eq!(requested_view(&params(&[("long", "1")])), SnapshotView::Full);
    }

    #[tokio::test]
    async fn test_snapshot_short_view() {
        let body = snapshot_handler(State(state()), Query(params(&[]))).await;
        assert!(body.starts_with("now="));
        assert!(body.contains("test-1.0"));
        assert!(body.contains("12ms, 3ms; **"));
        assert!(!body.contains("Nightmode"));
    }

    #[tokio::test]
    async fn test_snapshot_long_view() {
        let body = snapshot_handler(State(state()), Query(params(&[("long", "1")]))).await;
        assert!(body.contains("Nightmode from 22 to 5"));
        assert!(body.contains("12ms, 3ms; **"));
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = health_handler(State(state())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.blocks, 2);
    }
}
