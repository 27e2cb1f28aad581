//! Job admission, tracking and dispatch.
//!
//! - **MessageReceiver**: Long-polls the queue backend and admits messages
//! - **JobTracker**: Bounded registry of in-flight jobs plus the hand-off
//!   channel to the dispatch loop
//! - **MessageConsumer**: Dispatch loop that POSTs each job to the worker
//! - **Job**: One received message and its write-once outcome
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐   receive_batch    ┌─────────────────┐
//!    │ Queue backend│ ─────────────────► │ MessageReceiver │
//!    └──────▲───────┘                    └────────┬────────┘
//!           │                                     │ admit
//!           │ delete (on 200)            ┌────────▼────────┐
//!           │                            │   JobTracker    │◄── stat server
//!           │                            └────────┬────────┘
//!           │                                     │ next_job / complete
//!    ┌──────┴──────────┐   POST payload  ┌────────▼────────┐
//!    │ MessageConsumer │ ──────────────► │  HTTP worker    │
//!    └─────────────────┘                 └─────────────────┘
//! ```
//!
//! # Reliability
//!
//! - **At most N in flight**: admission is the only way in and is bounded
//! - **No duplicate dispatch**: an ID is tracked at most once at a time
//! - **Acknowledge on success only**: everything else is redelivered by the
//!   backend's visibility timeout
//! - **Graceful shutdown**: dispatched jobs always reach `complete`

pub mod consumer;
pub mod job;
pub mod receiver;
pub mod tracker;

pub use consumer::{ConsumerConfig, JobEndHook, JobStartHook, MessageConsumer};
pub use job::{Job, JobOutcome, JobSummary};
pub use receiver::{MessageReceiver, ReceiverConfig};
pub use tracker::{JobTracker, ScoreBoard, WorkerStats};
