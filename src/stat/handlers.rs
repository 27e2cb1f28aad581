//! Request handlers for the stat/control surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::metrics::export_metrics;
use crate::scheduler::{JobSummary, JobTracker, WorkerStats};

/// Shared state for all stat handlers.
#[derive(Clone)]
pub struct StatState {
    pub tracker: Arc<JobTracker>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StatState {
    pub fn new(tracker: Arc<JobTracker>) -> Self {
        Self {
            tracker,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Body of `GET /worker/current/jobs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentJobsResponse {
    pub current_jobs: Vec<JobSummary>,
}

/// Body of `POST /worker/pause` and `POST /worker/resume`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Body of `GET /stats`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub version: String,
    pub started_at: String,
    pub uptime_seconds: u64,
    /// Tokio worker threads.
    pub runtime_workers: usize,
    /// Tasks currently alive on the runtime.
    pub alive_tasks: usize,
    /// Jobs currently tracked.
    pub in_flight_jobs: usize,
}

pub async fn worker_stats(State(state): State<StatState>) -> Json<WorkerStats> {
    Json(state.tracker.stats())
}

pub async fn current_jobs(State(state): State<StatState>) -> Json<CurrentJobsResponse> {
    Json(CurrentJobsResponse {
        current_jobs: state.tracker.current_summaries(),
    })
}

pub async fn pause(State(state): State<StatState>) -> Json<SuccessResponse> {
    info!("Pause requested over stat server");
    state.tracker.pause();
    Json(SuccessResponse { success: true })
}

pub async fn resume(State(state): State<StatState>) -> Json<SuccessResponse> {
    info!("Resume requested over stat server");
    state.tracker.resume();
    Json(SuccessResponse { success: true })
}

pub async fn process_stats(State(state): State<StatState>) -> Json<ProcessStats> {
    let runtime = tokio::runtime::Handle::current().metrics();

    Json(ProcessStats {
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        uptime_seconds: state.started.elapsed().as_secs(),
        runtime_workers: runtime.num_workers(),
        alive_tasks: runtime.num_alive_tasks(),
        in_flight_jobs: state.tracker.busy(),
    })
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        export_metrics(),
    )
}

/// Answer for a known path requested with the wrong verb.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::CONTENT_TYPE, "text/plain")],
        "Method Not Allowed",
    )
}
