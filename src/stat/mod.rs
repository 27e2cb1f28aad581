//! Stat/control HTTP server.
//!
//! | Route | Verb | Response |
//! |-------|------|----------|
//! | `/worker/stats` | GET | Tracker counters and slot usage |
//! | `/worker/current/jobs` | GET | In-flight job summaries |
//! | `/worker/pause` | POST | Stops admissions |
//! | `/worker/resume` | POST | Allows admissions again |
//! | `/stats` | GET | Process information |
//! | `/metrics` | GET | Prometheus text format |
//!
//! Any other verb on these paths gets `405 Method Not Allowed` as plain text.

pub mod handlers;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ServerError;

pub use handlers::{CurrentJobsResponse, ProcessStats, StatState, SuccessResponse};

use handlers::{
    current_jobs, method_not_allowed, metrics, pause, process_stats, resume, worker_stats,
};

/// Builds the stat router.
pub fn routes(state: StatState) -> Router {
    Router::new()
        .route(
            "/worker/stats",
            get(worker_stats).fallback(method_not_allowed),
        )
        .route(
            "/worker/current/jobs",
            get(current_jobs).fallback(method_not_allowed),
        )
        .route("/worker/pause", post(pause).fallback(method_not_allowed))
        .route("/worker/resume", post(resume).fallback(method_not_allowed))
        .route("/stats", get(process_stats).fallback(method_not_allowed))
        .route("/metrics", get(metrics).fallback(method_not_allowed))
        .with_state(state)
}

/// A bound stat server, ready to serve.
pub struct StatServer {
    listener: TcpListener,
    router: Router,
}

impl StatServer {
    /// Binds the listener. Use port 0 to pick a free port.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address is unavailable.
    pub async fn bind(addr: SocketAddr, state: StatState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            router: routes(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `cancel` fires, then finishes open requests and returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(%addr, "Stat server listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("Stat server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::scheduler::{Job, JobTracker};

    fn app(capacity: usize) -> (Arc<JobTracker>, Router) {
        let tracker = Arc::new(JobTracker::new(capacity));
        let router = routes(StatState::new(Arc::clone(&tracker)));
        (tracker, router)
    }

    async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_worker_stats() {
        let (tracker, router) = app(3);
        assert!(tracker.admit(Job::new("a", "{}", "r")));

        let (status, body) = send(router, Method::GET, "/worker/stats").await;
        let json: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["is_working"], true);
        assert_eq!(json["total_handled"], 0);
        assert_eq!(json["max_worker"], 3);
        assert_eq!(json["busy_worker"], 1);
        assert_eq!(json["idle_worker"], 2);
    }

    #[tokio::test]
    async fn test_current_jobs_lists_in_flight() {
        let (tracker, router) = app(3);
        assert!(tracker.admit(Job::new("job-1", r#"{"x":1}"#, "r")));

        let (status, body) = send(router, Method::GET, "/worker/current/jobs").await;
        let response: CurrentJobsResponse = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.current_jobs.len(), 1);
        assert_eq!(response.current_jobs[0].id, "job-1");
        assert_eq!(response.current_jobs[0].payload, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_current_jobs_empty() {
        let (_, router) = app(3);

        let (_, body) = send(router, Method::GET, "/worker/current/jobs").await;

        assert_eq!(body, r#"{"current_jobs":[]}"#);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (tracker, router) = app(3);

        let (status, body) = send(router.clone(), Method::POST, "/worker/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"success":true}"#);
        assert!(!tracker.is_working());

        let (status, body) = send(router, Method::POST, "/worker/resume").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"success":true}"#);
        assert!(tracker.is_working());
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let (tracker, router) = app(3);

        for (method, uri) in [
            (Method::POST, "/worker/stats"),
            (Method::POST, "/worker/current/jobs"),
            (Method::GET, "/worker/pause"),
            (Method::GET, "/worker/resume"),
            (Method::DELETE, "/stats"),
        ] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{uri}");
            assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"Method Not Allowed");
        }

        assert!(tracker.is_working());
    }

    #[tokio::test]
    async fn test_process_stats() {
        let (_, router) = app(1);

        let (status, body) = send(router, Method::GET, "/stats").await;
        let stats: ProcessStats = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats.pid, std::process::id());
        assert_eq!(stats.version, env!("CARGO_PKG_VERSION"));
        assert!(stats.started_at.ends_with('Z'));
        assert_eq!(stats.runtime_workers, 1);
        assert_eq!(stats.in_flight_jobs, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_process_stats_reports_runtime() {
        let (tracker, router) = app(4);
        assert!(tracker.admit(Job::new("busy", "{}", "receipt:busy")));

        let (_, body) = send(router, Method::GET, "/stats").await;
        let stats: ProcessStats = serde_json::from_str(&body).unwrap();

        assert_eq!(stats.runtime_workers, 2);
        assert_eq!(stats.in_flight_jobs, 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let _ = crate::metrics::init_metrics();
        let (_, router) = app(1);

        let (status, body) = send(router, Method::GET, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.starts_with("# Error"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (_, router) = app(1);

        let (status, _) = send(router, Method::GET, "/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let tracker = Arc::new(JobTracker::new(1));
        let server = StatServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            StatState::new(tracker),
        )
        .await
        .expect("bind");
        let addr = server.local_addr().expect("addr");
        assert_ne!(addr.port(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.run(cancel.clone()));

        let body = reqwest::get(format!("http://{}/worker/stats", addr))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert!(body.contains("\"max_worker\":1"));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server should stop")
            .expect("join")
            .expect("serve");
    }
}
