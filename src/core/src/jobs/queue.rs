//! Queue orchestration: claiming, outcome reporting, retry re-queue, DLQ
//! management, and orphaned-lock reclamation.
//!
//! The orchestrator composes the store and the job state machine. It never
//! persists anything itself except through the store's document operations,
//! and it holds no in-memory queue state: every worker sees the same
//! durable tables, and `acquire_lock` is the only point where two workers
//! can race over the same job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::job::{Job, JobId, JobPolicy, JobState};
use crate::jobs::store::JobStore;

/// Default age after which a lock is considered orphaned.
pub const DEFAULT_LOCK_MAX_AGE: Duration = Duration::from_secs(3600);

/// Lock owner recorded while the retry re-queue pass holds a job.
const RETRY_SWEEP_OWNER: &str = "retry-sweep";

/// Per-state job counts plus the total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

/// The queue orchestrator shared by all workers.
pub struct JobQueue {
    store: Arc<JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Construct a Pending job with the given policy and persist it.
    pub async fn enqueue(&self, command: impl Into<String>, policy: JobPolicy) -> Result<Job> {
        let job = Job::new(command, policy);
        self.store.save_job(&job).await?;
        info!(job_id = %job.id, command = %job.command, "job enqueued");
        Ok(job)
    }

    /// Move every Failed job whose backoff delay has elapsed back to
    /// Pending, keeping its attempt count. Returns how many were re-queued.
    ///
    /// Jobs whose attempts are exhausted never reach this path: `fail_job`
    /// marks them Dead in the same call that records the failure.
    ///
    /// The pass runs concurrently from every worker's claim cycle, so each
    /// candidate follows the same discipline as a claim: take the lock,
    /// re-read, mutate only if the re-read still qualifies, release. A
    /// snapshot entry claimed by another worker in the meantime is skipped,
    /// never overwritten.
    pub async fn requeue_retryable(&self) -> Result<usize> {
        let now = Utc::now();
        let failed = self.store.get_jobs_by_state(JobState::Failed).await?;
        let mut requeued = 0;

        for candidate in failed {
            if !candidate.should_retry() || !candidate.retry_due(now) {
                continue;
            }
            if !self.store.acquire_lock(&candidate.id, RETRY_SWEEP_OWNER).await? {
                continue; // mid-claim elsewhere; its owner decides the fate
            }

            let current = match self.store.get_job(&candidate.id).await {
                Ok(current) => current,
                Err(error) => {
                    self.rollback_lock(&candidate.id).await;
                    return Err(error);
                }
            };

            match current {
                Some(mut job) if job.should_retry() && job.retry_due(now) => {
                    job.requeue();
                    match self.store.save_job(&job).await {
                        Ok(()) => {
                            requeued += 1;
                            info!(
                                job_id = %job.id,
                                attempts = job.attempts,
                                "failed job re-queued for retry"
                            );
                        }
                        Err(error) => {
                            warn!(job_id = %job.id, %error, "failed to re-queue job");
                        }
                    }
                }
                // Raced: deleted or no longer a due Failed job since the scan.
                _ => {}
            }

            if let Err(error) = self.store.release_lock(&candidate.id).await {
                warn!(job_id = %candidate.id, %error, "sweep lock release failed; orphan sweep will reclaim");
            }
        }

        Ok(requeued)
    }

    /// Claim the next Pending job for `worker_id`, oldest first.
    ///
    /// For each candidate: take the lock, re-read the job to see the latest
    /// persisted state, and proceed only if it is still Pending. A failed
    /// persist rolls the lock back and moves on to the next candidate.
    pub async fn next_pending(&self, worker_id: &str) -> Result<Option<Job>> {
        // Give due retries a chance to re-enter the scan. A storage fault
        // here must not stop the claim itself.
        if let Err(error) = self.requeue_retryable().await {
            warn!(worker = %worker_id, %error, "retry re-queue pass failed");
        }

        let mut candidates = self.store.get_jobs_by_state(JobState::Pending).await?;
        candidates.sort_by_key(|job| job.created_at);

        for candidate in candidates {
            if !self.store.acquire_lock(&candidate.id, worker_id).await? {
                continue; // another owner; expected, not an error
            }

            let current = match self.store.get_job(&candidate.id).await? {
                Some(job) if job.state == JobState::Pending => job,
                _ => {
                    // Raced: deleted or no longer Pending since the scan.
                    self.rollback_lock(&candidate.id).await;
                    continue;
                }
            };

            let mut claimed = current;
            claimed.mark_processing();
            match self.store.save_job(&claimed).await {
                Ok(()) => {
                    debug!(
                        job_id = %claimed.id,
                        worker = %worker_id,
                        attempt = claimed.attempts,
                        "job claimed"
                    );
                    return Ok(Some(claimed));
                }
                Err(error) => {
                    warn!(job_id = %claimed.id, %error, "claim persist failed; rolling back lock");
                    self.rollback_lock(&candidate.id).await;
                }
            }
        }

        Ok(None)
    }

    /// Record a successful execution: persist Completed, then release the
    /// lock. The lock is released only after the persist succeeds, so a
    /// storage fault leaves the job Processing under its lock (reclaimed
    /// later by the orphan sweep).
    pub async fn complete_job(&self, job: &mut Job, output: impl Into<String>) -> Result<()> {
        job.mark_completed(output);
        self.store.save_job(job).await?;
        self.release_after_persist(&job.id).await;
        info!(job_id = %job.id, attempts = job.attempts, "job completed");
        Ok(())
    }

    /// Record a failed execution. If the job's attempts are exhausted it is
    /// marked Dead in this same call, never left Failed past the threshold.
    pub async fn fail_job(&self, job: &mut Job, error: impl Into<String>) -> Result<()> {
        job.mark_failed(error);

        if job.is_expired() {
            job.mark_dead();
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "job moved to dead letter queue"
            );
        }

        self.store.save_job(job).await?;
        self.release_after_persist(&job.id).await;
        Ok(())
    }

    /// Reset a Dead job to a claimable Pending state.
    ///
    /// Returns `Ok(false)` without touching anything unless the job exists
    /// and is currently Dead.
    pub async fn retry_dlq_job(&self, id: &JobId) -> Result<bool> {
        let mut job = match self.store.get_job(id).await? {
            Some(job) if job.state == JobState::Dead => job,
            _ => return Ok(false),
        };

        job.reset_for_dlq_retry();
        self.store.save_job(&job).await?;
        info!(job_id = %id, "dead job reset to pending");
        Ok(true)
    }

    /// Jobs currently parked in the dead letter queue.
    pub async fn dlq_jobs(&self) -> Result<Vec<Job>> {
        self.store.get_jobs_by_state(JobState::Dead).await
    }

    /// Tally the full job table into per-state counts.
    pub async fn stats(&self) -> Result<QueueStats> {
        let jobs = self.store.get_all_jobs().await?;
        let mut stats = QueueStats {
            total: jobs.len(),
            ..Default::default()
        };

        for job in jobs.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Dead => stats.dead += 1,
            }
        }

        Ok(stats)
    }

    /// Remove every lock strictly older than `max_age` and make the jobs
    /// they stranded claimable again.
    ///
    /// A pruned lock whose job is still Processing means its worker died
    /// mid-execution; the job is re-queued (attempts untouched) so it does
    /// not stay Processing forever. Returns the number of locks removed.
    pub async fn cleanup_orphaned_locks(&self, max_age: Duration) -> Result<usize> {
        // A max age beyond the representable range puts the cutoff before
        // any recordable timestamp: no lock can qualify.
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let pruned = self.store.prune_locks(cutoff).await?;
        let removed = pruned.len();

        for (job_id, entry) in pruned {
            warn!(
                job_id = %job_id,
                worker = %entry.worker_id,
                locked_at = %entry.locked_at,
                "removed orphaned lock"
            );

            let Ok(id) = job_id.parse::<JobId>() else {
                continue;
            };
            match self.store.get_job(&id).await {
                Ok(Some(mut job)) if job.state == JobState::Processing => {
                    job.requeue();
                    if let Err(error) = self.store.save_job(&job).await {
                        warn!(job_id = %id, %error, "failed to re-queue orphaned job");
                    } else {
                        info!(job_id = %id, "orphaned job re-queued");
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(job_id = %id, %error, "failed to inspect orphaned job");
                }
            }
        }

        Ok(removed)
    }

    /// List jobs, newest first, optionally filtered by state.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>> {
        let jobs: HashMap<String, Job> = self.store.get_all_jobs().await?;
        let mut jobs: Vec<Job> = jobs
            .into_values()
            .filter(|job| state.map_or(true, |s| job.state == s))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Best-effort lock release after a successful persist. A failure here
    /// leaves an orphan for the sweep; it must not undo the persisted state.
    async fn release_after_persist(&self, id: &JobId) {
        if let Err(error) = self.store.release_lock(id).await {
            warn!(job_id = %id, %error, "lock release failed; sweep will reclaim");
        }
    }

    /// Compensating rollback of a lock taken for a claim that did not stick.
    async fn rollback_lock(&self, id: &JobId) {
        if let Err(error) = self.store.release_lock(id).await {
            warn!(job_id = %id, %error, "lock rollback failed; sweep will reclaim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn queue() -> (TempDir, JobQueue) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("data")).await.unwrap();
        (dir, JobQueue::new(Arc::new(store)))
    }

    fn no_retry() -> JobPolicy {
        JobPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enqueue_persists_pending_job() {
        let (_dir, queue) = queue().await;
        let job = queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.command, "echo hi");
    }

    #[tokio::test]
    async fn claim_increments_attempts_and_locks() {
        let (_dir, queue) = queue().await;
        let job = queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();

        let claimed = queue.next_pending("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.attempts, 1);

        let locks = queue.store().locks().await.unwrap();
        assert_eq!(locks[&job.id.to_string()].worker_id, "worker-1");

        // The claimed job is invisible to a second worker.
        assert!(queue.next_pending("worker-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_order_is_oldest_first() {
        let (_dir, queue) = queue().await;
        let first = queue.enqueue("echo 1", JobPolicy::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.enqueue("echo 2", JobPolicy::default()).await.unwrap();

        let a = queue.next_pending("w").await.unwrap().unwrap();
        let b = queue.next_pending("w").await.unwrap().unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(b.id, second.id);
    }

    #[tokio::test]
    async fn concurrent_claims_of_one_job_yield_one_winner() {
        let (_dir, queue) = queue().await;
        let queue = Arc::new(queue);
        queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..6 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.next_pending(&format!("worker-{n}")).await.unwrap()
            }));
        }

        let mut claims = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                claims += 1;
            }
        }
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn complete_releases_lock_and_stores_output() {
        let (_dir, queue) = queue().await;
        queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();

        queue.complete_job(&mut job, "hi\n").await.unwrap();

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.output.as_deref(), Some("hi\n"));
        assert!(queue.store().locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_with_retries_left_stays_failed() {
        let (_dir, queue) = queue().await;
        queue.enqueue("false", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();

        queue.fail_job(&mut job, "exit code 1").await.unwrap();

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("exit code 1"));
        assert!(queue.store().locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_failure_goes_dead_in_same_call() {
        let (_dir, queue) = queue().await;
        queue.enqueue("false", no_retry()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();

        queue.fail_job(&mut job, "exit code 1").await.unwrap();

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Dead);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("exit code 1"));
    }

    #[tokio::test]
    async fn requeue_honors_backoff_delay() {
        let (_dir, queue) = queue().await;
        queue.enqueue("false", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();
        queue.fail_job(&mut job, "exit code 1").await.unwrap();

        // Backoff (2^1 = 2s) has not elapsed: nothing to claim yet.
        assert_eq!(queue.requeue_retryable().await.unwrap(), 0);
        assert!(queue.next_pending("w").await.unwrap().is_none());

        // Age the failure past its delay and try again.
        job.finished_at = Some(Utc::now() - chrono::Duration::seconds(30));
        queue.store().save_job(&job).await.unwrap();

        let retried = queue.next_pending("w").await.unwrap().unwrap();
        assert_eq!(retried.id, job.id);
        assert_eq!(retried.attempts, 2); // preserved, then incremented by the claim
        assert_eq!(retried.last_error.as_deref(), Some("exit code 1"));
    }

    #[tokio::test]
    async fn requeue_pass_leaves_locked_jobs_alone() {
        let (_dir, queue) = queue().await;
        queue.enqueue("false", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w1").await.unwrap().unwrap();
        queue.fail_job(&mut job, "exit code 1").await.unwrap();

        // Age the failure so the retry is due.
        job.finished_at = Some(Utc::now() - chrono::Duration::seconds(30));
        queue.store().save_job(&job).await.unwrap();

        // Another worker is mid-claim on this job: its lock is held.
        assert!(queue.store().acquire_lock(&job.id, "w2").await.unwrap());

        // The pass must not touch a locked job, however due it looks.
        assert_eq!(queue.requeue_retryable().await.unwrap(), 0);
        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(
            queue.store().locks().await.unwrap()[&job.id.to_string()].worker_id,
            "w2"
        );

        // Lock released: the pass proceeds and cleans up after itself.
        queue.store().release_lock(&job.id).await.unwrap();
        assert_eq!(queue.requeue_retryable().await.unwrap(), 1);
        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(queue.store().locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_requeue_passes_requeue_once() {
        let (_dir, queue) = queue().await;
        let queue = Arc::new(queue);
        queue.enqueue("false", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w1").await.unwrap().unwrap();
        queue.fail_job(&mut job, "exit code 1").await.unwrap();
        job.finished_at = Some(Utc::now() - chrono::Duration::seconds(30));
        queue.store().save_job(&job).await.unwrap();

        // Every worker runs the pass; overlapping snapshots must not
        // stack re-queues or regress the record.
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.requeue_retryable().await.unwrap()
            }));
        }
        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 1);

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(queue.store().locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dlq_retry_requires_dead_state() {
        let (_dir, queue) = queue().await;
        let job = queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();

        // Pending job: not eligible.
        assert!(!queue.retry_dlq_job(&job.id).await.unwrap());
        // Unknown job: not eligible.
        assert!(!queue.retry_dlq_job(&JobId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn dlq_retry_resets_and_reclaims() {
        let (_dir, queue) = queue().await;
        queue.enqueue("false", no_retry()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();
        queue.fail_job(&mut job, "exit code 1").await.unwrap();
        assert_eq!(queue.dlq_jobs().await.unwrap().len(), 1);

        assert!(queue.retry_dlq_job(&job.id).await.unwrap());

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempts, 0);
        assert!(stored.last_error.is_none());

        // And it is claimable again.
        let reclaimed = queue.next_pending("w").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 1);
    }

    #[tokio::test]
    async fn stats_tally_all_states() {
        let (_dir, queue) = queue().await;
        queue.enqueue("a", JobPolicy::default()).await.unwrap();
        queue.enqueue("b", JobPolicy::default()).await.unwrap();
        let mut job = queue.next_pending("w").await.unwrap().unwrap();
        queue.complete_job(&mut job, "out").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn orphan_sweep_frees_stuck_processing_job() {
        let (_dir, queue) = queue().await;
        queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();
        let job = queue.next_pending("w").await.unwrap().unwrap();
        // Simulated worker death: Processing job, lock never released.

        // A generous max age leaves the young lock alone.
        assert_eq!(
            queue.cleanup_orphaned_locks(DEFAULT_LOCK_MAX_AGE).await.unwrap(),
            0
        );

        // Zero max age: any existing lock is strictly older than that.
        assert_eq!(
            queue.cleanup_orphaned_locks(Duration::ZERO).await.unwrap(),
            1
        );
        assert!(queue.store().locks().await.unwrap().is_empty());

        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
        assert_eq!(stored.attempts, 1);

        // Second run with no new activity removes nothing.
        assert_eq!(
            queue.cleanup_orphaned_locks(Duration::ZERO).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn orphan_sweep_tolerates_out_of_range_max_age() {
        let (_dir, queue) = queue().await;
        queue.enqueue("echo hi", JobPolicy::default()).await.unwrap();
        let job = queue.next_pending("w").await.unwrap().unwrap();

        // A max age past the representable range: the cutoff precedes any
        // timestamp, so nothing qualifies and nothing panics.
        assert_eq!(
            queue
                .cleanup_orphaned_locks(Duration::from_secs(u64::MAX))
                .await
                .unwrap(),
            0
        );
        let stored = queue.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
        assert_eq!(queue.store().locks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_jobs_filters_and_limits_newest_first() {
        let (_dir, queue) = queue().await;
        for n in 0..4 {
            queue
                .enqueue(format!("echo {n}"), JobPolicy::default())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let listed = queue.list_jobs(None, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].command, "echo 3");
        assert_eq!(listed[1].command, "echo 2");

        let pending = queue.list_jobs(Some(JobState::Pending), 10).await.unwrap();
        assert_eq!(pending.len(), 4);
        assert!(queue
            .list_jobs(Some(JobState::Dead), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
