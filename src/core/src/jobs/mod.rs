//! The durable job queue.
//!
//! - **Job**: the state-machine entity and its transition rules
//! - **Store**: crash-consistent JSON documents plus the claim primitive
//! - **Queue**: orchestration of claim, outcome, retry, DLQ, and sweep
//! - **Worker**: poll loops that execute commands and report outcomes
//!
//! ```text
//! WorkerPool ──claim/report──▶ JobQueue ──persist──▶ JobStore
//!                                 │
//!                                 └──transitions──▶ Job
//! ```
//!
//! Control flow is polling, not push: workers pull from the queue, and the
//! only shared mutable resource between them is the store.

pub mod job;
pub mod queue;
pub mod store;
pub mod worker;

pub use job::{Job, JobId, JobPolicy, JobState};
pub use queue::{JobQueue, QueueStats, DEFAULT_LOCK_MAX_AGE};
pub use store::{JobStore, LockEntry};
pub use worker::{Worker, WorkerConfig, WorkerPool, WorkerSnapshot, WorkerStats};
