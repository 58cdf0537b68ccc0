//! # jobq Core
//!
//! A durable background job queue for shell commands. Clients enqueue jobs,
//! a pool of independent workers claims and executes them, and failures are
//! retried with exponential backoff before landing in a dead letter queue
//! for manual intervention.
//!
//! ## Architecture
//!
//! - **Job state machine**: `Pending → Processing → {Completed | Failed}`,
//!   with `Failed → Dead` on exhausted retries and explicit DLQ revival
//! - **Durable store**: three JSON documents (jobs, locks, config) with
//!   atomic temp-write-and-rename replacement
//! - **Claim protocol**: presence-check-and-insert on the lock table is the
//!   single source of mutual exclusion between workers
//! - **Worker pool**: N polling tokio tasks with cooperative shutdown
//!
//! There is no central in-memory coordinator: workers coordinate solely
//! through the store, so they survive each other's crashes.

pub mod config;
pub mod error;
pub mod jobs;

pub use error::{JobqError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::QueueConfig;
    pub use crate::error::{JobqError, Result};
    pub use crate::jobs::{
        Job, JobId, JobPolicy, JobQueue, JobState, JobStore, QueueStats, WorkerConfig,
        WorkerPool, DEFAULT_LOCK_MAX_AGE,
    };
}
