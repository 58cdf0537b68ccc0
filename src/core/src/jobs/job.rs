//! Job definitions: identifiers, states, and the transition rules.
//!
//! A [`Job`] is a value object. Every method here is pure mutation with no
//! I/O; persistence is the store's business and sequencing is the
//! orchestrator's.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// State of a job in its lifecycle.
///
/// `Pending → Processing → {Completed | Failed}`; `Failed → Dead` when the
/// job's attempts are exhausted, `Failed → Pending` via the timed retry
/// re-queue, and `Dead → Pending` only through an explicit DLQ retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed by a worker
    Pending,
    /// Claimed and currently executing
    Processing,
    /// Finished with exit status zero
    Completed,
    /// Last attempt failed; may be retried
    Failed,
    /// Retries exhausted; parked in the dead letter queue
    Dead,
}

impl JobState {
    /// All states, in lifecycle order. Enumerated in parse errors.
    pub const ALL: [JobState; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Dead,
    ];

    /// Check whether the job can make no further progress on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => {
                let expected: Vec<String> = Self::ALL.iter().map(|s| s.to_string()).collect();
                Err(format!(
                    "unknown job state: {other} (expected one of: {})",
                    expected.join(", ")
                ))
            }
        }
    }
}

/// Per-job execution policy, fixed at creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Maximum retry attempts before the job is declared dead
    pub max_retries: u32,
    /// Base of the exponential backoff delay (`backoff_base ^ attempts` seconds)
    pub backoff_base: u32,
    /// Hard wall-clock limit for a single execution, in seconds
    pub timeout_secs: u64,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            timeout_secs: 30,
        }
    }
}

/// A unit of work: an opaque shell command plus its lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, immutable once created
    pub id: JobId,
    /// The shell command to execute, immutable
    pub command: String,
    /// Current lifecycle state
    pub state: JobState,
    /// Number of times execution was started
    pub attempts: u32,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// Exponential backoff base
    pub backoff_base: u32,
    /// Execution timeout in seconds
    pub timeout_secs: u64,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// Touched on every mutation
    pub updated_at: DateTime<Utc>,
    /// When the most recent attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the job last reached Completed, Failed, or Dead
    pub finished_at: Option<DateTime<Utc>>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Captured stdout of the successful attempt
    pub output: Option<String>,
}

impl Job {
    /// Create a new Pending job with the given policy.
    pub fn new(command: impl Into<String>, policy: JobPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries: policy.max_retries,
            backoff_base: policy.backoff_base,
            timeout_secs: policy.timeout_secs,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            output: None,
        }
    }

    /// Transition into Processing. The only place `attempts` increments.
    pub fn mark_processing(&mut self) {
        let now = Utc::now();
        self.state = JobState::Processing;
        self.attempts += 1;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Transition into Completed with the captured output.
    pub fn mark_completed(&mut self, output: impl Into<String>) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.finished_at = Some(now);
        self.updated_at = now;
        self.output = Some(output.into());
    }

    /// Transition into Failed with the failure message.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.state = JobState::Failed;
        self.finished_at = Some(now);
        self.updated_at = now;
        self.last_error = Some(error.into());
    }

    /// Transition into Dead. The failure message from the preceding
    /// `mark_failed` is kept.
    pub fn mark_dead(&mut self) {
        let now = Utc::now();
        self.state = JobState::Dead;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Put the job back in line for another attempt, keeping its attempt
    /// count and last error. Used by the timed retry re-queue and by the
    /// orphaned-lock sweep.
    pub fn requeue(&mut self) {
        self.state = JobState::Pending;
        self.updated_at = Utc::now();
    }

    /// Reset a Dead job to a fresh Pending state: attempts back to zero,
    /// error and attempt timestamps cleared. The only transition that
    /// decreases `attempts`.
    pub fn reset_for_dlq_retry(&mut self) {
        self.state = JobState::Pending;
        self.attempts = 0;
        self.last_error = None;
        self.started_at = None;
        self.finished_at = None;
        self.updated_at = Utc::now();
    }

    /// True iff the job is Failed and has attempts left.
    pub fn should_retry(&self) -> bool {
        self.state == JobState::Failed && self.attempts <= self.max_retries
    }

    /// True iff the job is Failed and its attempts are exhausted.
    ///
    /// Evaluated immediately after `mark_failed`, before any retry is
    /// attempted, so at `attempts == max_retries` both this and
    /// `should_retry` hold; expiry wins and the job goes to Dead in the
    /// same step that recorded the failure.
    pub fn is_expired(&self) -> bool {
        self.state == JobState::Failed && self.attempts >= self.max_retries
    }

    /// Exponential backoff delay before the next retry:
    /// `backoff_base ^ attempts` seconds.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.backoff_base).saturating_pow(self.attempts))
    }

    /// Whether the backoff delay since the last failure has elapsed.
    /// A job with no recorded `finished_at` is considered ready.
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        match self.finished_at {
            Some(finished) => match chrono::Duration::from_std(self.retry_delay()) {
                Ok(delay) => finished
                    .checked_add_signed(delay)
                    .is_some_and(|due| now >= due),
                // A delay too large to represent never elapses.
                Err(_) => false,
            },
            None => true,
        }
    }
}
