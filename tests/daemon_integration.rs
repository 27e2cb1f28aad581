//! End-to-end tests: in-memory queue, mock HTTP worker, full daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqsd::config::QueueBackend;
use sqsd::resource::{InMemoryResource, Resource};
use sqsd::{Daemon, DaemonConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(worker_url: &str, max_workers: usize) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.worker.url = worker_url.to_string();
    config.worker.max_workers = max_workers;
    config.queue.backend = QueueBackend::Memory;
    config.queue.wait_time_seconds = 1;
    config.queue.idle_interval_ms = 10;
    config.stat.enabled = false;
    config.shutdown_timeout_secs = 5;
    config
}

struct Running {
    queue: Arc<InMemoryResource>,
    tracker: Arc<sqsd::scheduler::JobTracker>,
    stat_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), sqsd::DaemonError>>,
}

impl Running {
    async fn stop(self) -> Result<(), sqsd::DaemonError> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("daemon should stop")
            .expect("daemon task")
    }
}

async fn start(config: DaemonConfig) -> Running {
    let queue = Arc::new(InMemoryResource::new(Duration::from_secs(30)));
    let daemon = Daemon::new(config, Arc::clone(&queue) as Arc<dyn Resource>)
        .await
        .expect("daemon");
    let tracker = Arc::clone(daemon.tracker());
    let stat_addr = daemon.stat_addr();
    let cancel = daemon.cancellation_token();
    let handle = tokio::spawn(daemon.run(std::future::pending()));

    Running {
        queue,
        tracker,
        stat_addr,
        cancel,
        handle,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_messages_are_dispatched_and_deleted() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(5)
        .mount(&worker)
        .await;
    let daemon = start(config(&worker.uri(), 2)).await;

    for i in 0..5 {
        daemon.queue.push_with_id(format!("msg-{}", i), r#"{"n":1}"#);
    }

    let tracker = Arc::clone(&daemon.tracker);
    assert!(wait_until(|| tracker.score_board().total_succeeded() == 5).await);
    assert_eq!(daemon.queue.deleted_count(), 5);
    assert_eq!(daemon.queue.in_flight_count(), 0);

    daemon.stop().await.expect("clean shutdown");
}

#[tokio::test]
async fn test_always_failing_worker_never_deletes() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&worker)
        .await;
    let daemon = start(config(&worker.uri(), 2)).await;

    daemon.queue.push_with_id("doomed", "{}");

    let tracker = Arc::clone(&daemon.tracker);
    assert!(wait_until(|| tracker.score_board().total_failed() == 1).await);
    assert_eq!(tracker.score_board().total_succeeded(), 0);
    assert_eq!(tracker.busy(), 0);
    assert_eq!(daemon.queue.deleted_count(), 0);
    // Left for the visibility timeout to redeliver.
    assert_eq!(daemon.queue.in_flight_count(), 1);

    daemon.stop().await.expect("clean shutdown");
}

#[tokio::test]
async fn test_single_slot_processes_jobs_one_at_a_time() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .expect(2)
        .mount(&worker)
        .await;
    let daemon = start(config(&worker.uri(), 1)).await;

    daemon.queue.push_with_id("A", "{}");
    daemon.queue.push_with_id("B", "{}");

    let tracker = Arc::clone(&daemon.tracker);
    let mut max_busy = 0;
    let done = wait_until(|| {
        max_busy = max_busy.max(tracker.busy());
        tracker.score_board().total_succeeded() == 2
    })
    .await;

    assert!(done);
    assert_eq!(max_busy, 1);
    assert_eq!(daemon.queue.deleted_count(), 2);

    daemon.stop().await.expect("clean shutdown");
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_jobs() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&worker)
        .await;
    let daemon = start(config(&worker.uri(), 4)).await;

    daemon.queue.push_with_id("slow-1", "{}");
    daemon.queue.push_with_id("slow-2", "{}");

    let tracker = Arc::clone(&daemon.tracker);
    assert!(wait_until(|| tracker.busy() == 2).await);
    // Both calls must be on the wire before shutting down.
    let deadline = Instant::now() + Duration::from_secs(5);
    while worker.received_requests().await.map_or(0, |r| r.len()) < 2 && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let queue = Arc::clone(&daemon.queue);
    let started = Instant::now();
    daemon.stop().await.expect("clean shutdown");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(tracker.score_board().total_handled(), 2);
    assert_eq!(tracker.score_board().total_failed(), 2);
    assert_eq!(tracker.busy(), 0);
    assert_eq!(queue.deleted_count(), 0);
    assert!(tracker.is_closed());
    assert!(!tracker.can_admit("after-shutdown"));
}

#[tokio::test]
async fn test_pause_and_resume_over_stat_server() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&worker)
        .await;
    let mut config = config(&worker.uri(), 2);
    config.stat.enabled = true;
    config.stat.bind = SocketAddr::from(([127, 0, 0, 1], 0));
    let daemon = start(config).await;
    let stat = format!("http://{}", daemon.stat_addr.expect("stat server"));
    let client = reqwest::Client::new();

    let paused: serde_json::Value = client
        .post(format!("{}/worker/pause", stat))
        .send()
        .await
        .expect("pause")
        .json()
        .await
        .expect("json");
    assert_eq!(paused["success"], true);

    // Let any long poll that started before the pause run out.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    daemon.queue.push_with_id("held", "{}");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(daemon.queue.pending_count(), 1);

    let stats: serde_json::Value = client
        .get(format!("{}/worker/stats", stat))
        .send()
        .await
        .expect("stats")
        .json()
        .await
        .expect("json");
    assert_eq!(stats["is_working"], false);

    client
        .post(format!("{}/worker/resume", stat))
        .send()
        .await
        .expect("resume");

    let tracker = Arc::clone(&daemon.tracker);
    assert!(wait_until(|| tracker.score_board().total_succeeded() == 1).await);

    let stats: serde_json::Value = client
        .get(format!("{}/worker/stats", stat))
        .send()
        .await
        .expect("stats")
        .json()
        .await
        .expect("json");
    assert_eq!(stats["is_working"], true);
    assert_eq!(stats["total_handled"], 1);
    assert_eq!(stats["total_succeeded"], 1);

    drop(client);
    daemon.stop().await.expect("clean shutdown");
}
