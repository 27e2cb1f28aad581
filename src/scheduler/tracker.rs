//! Bounded registry of in-flight jobs.
//!
//! The tracker is the only owner of in-flight job state. It decides whether a
//! received message may be admitted, hands admitted jobs to the dispatch loop,
//! and accounts for them when they complete.
//!
//! # Admission
//!
//! A job is admitted only when all of the following hold:
//!
//! - the tracker is running (not paused, not closed)
//! - fewer than `capacity` jobs are tracked
//! - no tracked job has the same ID
//!
//! The check, the registry insert and the hand-off enqueue happen under one
//! lock, so racing receivers can never exceed capacity or track an ID twice.
//! The registry bounds how many jobs are live, so the hand-off channel itself
//! is unbounded. Each admission carries a ticket; the dispatch side yields a
//! queued job only while the registry still holds that ticket undispatched,
//! so a job completed or released before it was picked up is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::job::{Job, JobSummary};

/// Running totals of completed jobs.
#[derive(Debug)]
pub struct ScoreBoard {
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
    max_worker: usize,
}

impl ScoreBoard {
    fn new(max_worker: usize) -> Self {
        Self {
            total_succeeded: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            max_worker,
        }
    }

    fn record_success(&self) {
        self.total_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.total_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_succeeded(&self) -> u64 {
        self.total_succeeded.load(Ordering::SeqCst)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    /// Succeeded plus failed.
    pub fn total_handled(&self) -> u64 {
        self.total_succeeded() + self.total_failed()
    }

    pub fn max_worker(&self) -> usize {
        self.max_worker
    }
}

/// Snapshot of tracker statistics, as served on `/worker/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub is_working: bool,
    pub total_handled: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub max_worker: usize,
    pub busy_worker: usize,
    pub idle_worker: usize,
}

/// Registry entry for one admitted job.
#[derive(Debug)]
struct Tracked {
    job: Job,
    ticket: u64,
    dispatched: bool,
}

/// Bounded registry of in-flight jobs with a hand-off channel to the
/// dispatch loop.
pub struct JobTracker {
    registry: Mutex<HashMap<String, Tracked>>,
    capacity: usize,
    runnable: AtomicBool,
    closed: AtomicBool,
    next_ticket: AtomicU64,
    score_board: ScoreBoard,
    ready_tx: mpsc::UnboundedSender<(u64, Job)>,
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(u64, Job)>>,
}

impl JobTracker {
    /// Creates a running tracker that admits at most `capacity` concurrent
    /// jobs.
    pub fn new(capacity: usize) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        Self {
            registry: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
            runnable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            next_ticket: AtomicU64::new(0),
            score_board: ScoreBoard::new(capacity),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
        }
    }

    /// Returns whether `admit` would currently accept a job with this ID.
    ///
    /// Advisory only: the answer can change before the caller acts on it.
    pub fn can_admit(&self, id: &str) -> bool {
        let registry = self.registry.lock().expect("job registry lock poisoned");
        self.accepts(&registry, id)
    }

    /// Registers the job and queues it for dispatch.
    ///
    /// Returns `false` when the tracker is paused or closed, full, or already
    /// tracking this ID. A rejected job must be left unacknowledged so the
    /// backend redelivers it.
    pub fn admit(&self, job: Job) -> bool {
        let mut registry = self.registry.lock().expect("job registry lock poisoned");
        if !self.accepts(&registry, job.id()) {
            debug!(job_id = %job.id(), "Job admission rejected");
            return false;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError((_, job))) = self.ready_tx.send((ticket, job.clone())) {
            warn!(job_id = %job.id(), "Dispatch channel closed, job not admitted");
            return false;
        }

        debug!(job_id = %job.id(), "Job admitted");
        registry.insert(
            job.id().to_string(),
            Tracked {
                job,
                ticket,
                dispatched: false,
            },
        );
        true
    }

    fn accepts(&self, registry: &HashMap<String, Tracked>, id: &str) -> bool {
        self.is_working()
            && !self.closed.load(Ordering::SeqCst)
            && registry.len() < self.capacity
            && !registry.contains_key(id)
    }

    /// Waits for the next admitted job.
    ///
    /// Each admission is yielded exactly once; jobs completed or released
    /// before being picked up are skipped. Cancel safe.
    pub async fn next_job(&self) -> Option<Job> {
        let mut ready = self.ready_rx.lock().await;
        loop {
            let (ticket, job) = ready.recv().await?;
            if self.claim(ticket, job.id()) {
                return Some(job);
            }
        }
    }

    /// Takes an admitted job off the hand-off channel without waiting.
    pub async fn try_next_job(&self) -> Option<Job> {
        let mut ready = self.ready_rx.lock().await;
        while let Ok((ticket, job)) = ready.try_recv() {
            if self.claim(ticket, job.id()) {
                return Some(job);
            }
        }
        None
    }

    /// Marks the admission with `ticket` as dispatched. Fails for stale
    /// entries whose slot was freed or reused since.
    fn claim(&self, ticket: u64, id: &str) -> bool {
        let mut registry = self.registry.lock().expect("job registry lock poisoned");
        match registry.get_mut(id) {
            Some(tracked) if tracked.ticket == ticket && !tracked.dispatched => {
                tracked.dispatched = true;
                true
            }
            _ => {
                debug!(job_id = %id, "Skipping stale hand-off entry");
                false
            }
        }
    }

    /// Removes a finished job and counts its outcome.
    ///
    /// Returns `false` if the job was not tracked; nothing is counted then.
    pub fn complete(&self, job: &Job) -> bool {
        let mut registry = self.registry.lock().expect("job registry lock poisoned");
        if registry.remove(job.id()).is_none() {
            debug!(job_id = %job.id(), "Ignoring completion of untracked job");
            return false;
        }

        match job.outcome() {
            Some(outcome) if outcome.is_success() => self.score_board.record_success(),
            Some(_) => self.score_board.record_failure(),
            None => {
                warn!(job_id = %job.id(), "Job completed without an outcome, counting as failed");
                self.score_board.record_failure();
            }
        }
        true
    }

    /// Drops an admitted job that was never dispatched, without counting it.
    ///
    /// Used when shutting down with jobs still on the hand-off channel; the
    /// backend redelivers their messages.
    pub fn release(&self, job: &Job) -> bool {
        let mut registry = self.registry.lock().expect("job registry lock poisoned");
        registry.remove(job.id()).is_some()
    }

    /// Stops new admissions. In-flight jobs are unaffected.
    pub fn pause(&self) {
        self.runnable.store(false, Ordering::SeqCst);
        info!("Job tracker paused");
    }

    /// Allows admissions again after `pause`.
    pub fn resume(&self) {
        self.runnable.store(true, Ordering::SeqCst);
        info!("Job tracker resumed");
    }

    /// Returns whether the tracker is accepting new jobs (not paused).
    pub fn is_working(&self) -> bool {
        self.runnable.load(Ordering::SeqCst)
    }

    /// Permanently stops admissions. Called once on shutdown; `resume` does
    /// not undo it.
    pub fn close(&self) {
        // Taking the lock orders close against any admission in progress.
        let _registry = self.registry.lock().expect("job registry lock poisoned");
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Job tracker closed to new admissions");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of all in-flight jobs.
    pub fn current_summaries(&self) -> Vec<JobSummary> {
        let registry = self.registry.lock().expect("job registry lock poisoned");
        registry.values().map(|tracked| tracked.job.summary()).collect()
    }

    /// Number of jobs currently tracked.
    pub fn busy(&self) -> usize {
        self.registry
            .lock()
            .expect("job registry lock poisoned")
            .len()
    }

    /// Number of free slots.
    pub fn idle_slots(&self) -> usize {
        self.capacity.saturating_sub(self.busy())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn score_board(&self) -> &ScoreBoard {
        &self.score_board
    }

    /// Consistent snapshot of counters and slot usage.
    pub fn stats(&self) -> WorkerStats {
        let registry = self.registry.lock().expect("job registry lock poisoned");
        let busy = registry.len();

        WorkerStats {
            is_working: self.is_working(),
            total_handled: self.score_board.total_handled(),
            total_succeeded: self.score_board.total_succeeded(),
            total_failed: self.score_board.total_failed(),
            max_worker: self.score_board.max_worker(),
            busy_worker: busy,
            idle_worker: self.capacity.saturating_sub(busy),
        }
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("capacity", &self.capacity)
            .field("busy", &self.busy())
            .field("is_working", &self.is_working())
            .field("closed", &self.is_closed())
            .finish()
    }
}
