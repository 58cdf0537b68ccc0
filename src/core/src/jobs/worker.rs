//! Workers: independent poll loops that claim, execute, and report jobs.
//!
//! Each worker is a tokio task running its own loop against the shared
//! orchestrator. There is no queue-side notification: workers pull. A
//! worker observes its shutdown channel only between poll cycles, never
//! while a child process is executing; an in-flight command is bounded only
//! by its own timeout.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::jobs::job::{Job, JobId};
use crate::jobs::queue::JobQueue;

/// Configuration shared by every worker in a pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when no job was available
    pub poll_interval: Duration,
    /// Sleep after an unexpected fault (e.g. a store outage), so an outage
    /// degrades to slow polling instead of a crash loop
    pub error_backoff: Duration,
    /// Bound on waiting for each worker to exit during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Live counters for one worker, shared between its task and the pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    running: AtomicBool,
    current_job: Mutex<Option<JobId>>,
}

impl WorkerStats {
    fn set_current(&self, job: Option<JobId>) {
        let mut current = self
            .current_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = job;
    }

    fn current(&self) -> Option<JobId> {
        *self
            .current_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, worker_id: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: worker_id.to_string(),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            current_job: self.current(),
        }
    }
}

/// A point-in-time view of one worker, for introspection and CLI display.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub processed: u64,
    pub failed: u64,
    pub running: bool,
    pub current_job: Option<JobId>,
}

/// A single poll-execute loop bound to one worker identity.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<JobQueue>,
        config: WorkerConfig,
        stats: Arc<WorkerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            config,
            stats,
            shutdown,
        }
    }

    /// Run until the shutdown channel flips. Nothing short of that stops
    /// the loop: job failures and store faults are absorbed back into
    /// polling.
    pub async fn run(mut self) {
        self.stats.running.store(true, Ordering::Relaxed);
        info!(worker = %self.id, "worker started");

        while !*self.shutdown.borrow() {
            match self.queue.next_pending(&self.id).await {
                Ok(Some(mut job)) => {
                    self.stats.set_current(Some(job.id));
                    self.process(&mut job).await;
                    self.stats.set_current(None);
                }
                Ok(None) => {
                    self.idle(self.config.poll_interval).await;
                }
                Err(error) => {
                    warn!(worker = %self.id, %error, "poll cycle fault, backing off");
                    self.idle(self.config.error_backoff).await;
                }
            }
        }

        self.stats.running.store(false, Ordering::Relaxed);
        info!(worker = %self.id, "worker stopped");
    }

    /// Sleep, waking early if shutdown is requested.
    async fn idle(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// Execute the job's command with output capture and a hard wall-clock
    /// timeout, then report the outcome. Every execution fault becomes a
    /// Failed transition with a descriptive error; none of them crash the
    /// loop.
    async fn process(&self, job: &mut Job) {
        info!(
            worker = %self.id,
            job_id = %job.id,
            command = %job.command,
            attempt = job.attempts,
            "processing job"
        );

        let timeout = Duration::from_secs(job.timeout_secs);
        let mut command = shell_command(&job.command);
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                self.queue.complete_job(job, stdout).await.map(|()| true)
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                let message = format!("exit code {}: {}", code, stderr.trim());
                self.queue.fail_job(job, message).await.map(|()| false)
            }
            Ok(Err(spawn_error)) => {
                let message = format!("system error: {spawn_error}");
                self.queue.fail_job(job, message).await.map(|()| false)
            }
            Err(_elapsed) => {
                let message = format!("timed out after {}s", job.timeout_secs);
                self.queue.fail_job(job, message).await.map(|()| false)
            }
        };

        match outcome {
            Ok(true) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %self.id, job_id = %job.id, "job succeeded");
            }
            Ok(false) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = %self.id,
                    job_id = %job.id,
                    error = %job.last_error.as_deref().unwrap_or("unknown"),
                    "job failed"
                );
            }
            Err(error) => {
                // Persist fault: the job stays Processing under its lock
                // until the orphan sweep reclaims it.
                error!(worker = %self.id, job_id = %job.id, %error, "failed to record outcome");
            }
        }
    }
}

/// Build a shell invocation for an opaque command string.
fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

struct WorkerHandle {
    id: String,
    stats: Arc<WorkerStats>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Creates and supervises N worker loops against one orchestrator.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    config: WorkerConfig,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Self {
        Self {
            queue,
            config,
            workers: Vec::new(),
        }
    }

    /// Spawn `count` additional workers, each as its own tokio task with
    /// its own shutdown channel.
    pub fn start(&mut self, count: usize) {
        for _ in 0..count {
            let id = format!("worker-{}", self.workers.len() + 1);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let stats = Arc::new(WorkerStats::default());

            let worker = Worker::new(
                id.clone(),
                self.queue.clone(),
                self.config.clone(),
                stats.clone(),
                shutdown_rx,
            );
            let join = tokio::spawn(worker.run());

            info!(worker = %id, "worker spawned");
            self.workers.push(WorkerHandle {
                id,
                stats,
                shutdown: shutdown_tx,
                join,
            });
        }
    }

    /// Number of workers this pool has spawned.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Snapshot every worker's counters.
    pub fn worker_stats(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|handle| handle.stats.snapshot(&handle.id))
            .collect()
    }

    /// Cooperative shutdown: flip every worker's flag, then wait (bounded)
    /// for each loop to exit. A worker mid-execution finishes its current
    /// job first; one that outlives the bound is abandoned with a warning.
    ///
    /// Returns each worker's final counters, read only after its loop has
    /// stopped (or been given up on), so work finished during the grace
    /// period is included.
    pub async fn shutdown(&mut self) -> Vec<WorkerSnapshot> {
        for handle in &self.workers {
            let _ = handle.shutdown.send(true);
        }

        let timeout = self.config.shutdown_timeout;
        let waits = self.workers.drain(..).map(|handle| async move {
            if tokio::time::timeout(timeout, handle.join).await.is_err() {
                warn!(worker = %handle.id, "worker did not stop within shutdown timeout");
            }
            handle.stats.snapshot(&handle.id)
        });
        let snapshots = join_all(waits).await;

        info!("worker pool stopped");
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobPolicy;
    use crate::jobs::queue::JobQueue;
    use crate::jobs::store::JobStore;
    use tempfile::TempDir;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    async fn pool() -> (TempDir, Arc<JobQueue>, WorkerPool) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("data")).await.unwrap();
        let queue = Arc::new(JobQueue::new(Arc::new(store)));
        let pool = WorkerPool::new(queue.clone(), fast_config());
        (dir, queue, pool)
    }

    #[test]
    fn config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn pool_assigns_sequential_identities() {
        let (_dir, _queue, mut pool) = pool().await;
        pool.start(3);
        assert_eq!(pool.worker_count(), 3);

        let ids: Vec<String> = pool
            .worker_stats()
            .into_iter()
            .map(|s| s.worker_id)
            .collect();
        assert_eq!(ids, ["worker-1", "worker-2", "worker-3"]);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn idle_pool_shuts_down_promptly() {
        let (_dir, _queue, mut pool) = pool().await;
        pool.start(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = std::time::Instant::now();
        pool.shutdown().await;
        assert!(before.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.worker_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_counts_outcomes() {
        let (_dir, queue, mut pool) = pool().await;
        queue.enqueue("echo ok", JobPolicy::default()).await.unwrap();
        queue
            .enqueue(
                "exit 7",
                JobPolicy {
                    max_retries: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        pool.start(1);
        for _ in 0..100 {
            let stats = pool.worker_stats().swap_remove(0);
            if stats.processed + stats.failed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let finals = pool.shutdown().await;

        // The shutdown snapshot carries the full tally for a stopped loop.
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].processed, 1);
        assert_eq!(finals[0].failed, 1);
        assert!(!finals[0].running);
        assert!(finals[0].current_job.is_none());

        let queue_stats = queue.stats().await.unwrap();
        assert_eq!(queue_stats.completed, 1);
        assert_eq!(queue_stats.dead, 1);
    }
}
