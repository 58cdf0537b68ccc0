//! Durable storage for jobs, locks, and configuration.
//!
//! The store keeps three independent JSON documents under one root
//! directory: `jobs.json` (job table), `locks.json` (lock table), and
//! `config.json` (configuration overlay). Every mutation rewrites the whole
//! document through a temp file followed by an atomic rename, so a reader
//! never observes a partial write and a crash mid-update leaves the previous
//! version intact.
//!
//! Within one process, each document's read-transform-write sequence runs
//! under its own async mutex, which makes [`JobStore::acquire_lock`] a true
//! check-and-insert between concurrent workers sharing this store. That
//! single primitive is the only source of mutual exclusion in the system;
//! all other mutations assume single-owner access after a successful claim.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{JobqError, Result};
use crate::jobs::job::{Job, JobId, JobState};

const JOBS_FILE: &str = "jobs.json";
const LOCKS_FILE: &str = "locks.json";
const CONFIG_FILE: &str = "config.json";

/// An ephemeral claim on a job, keyed by job id in the lock table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    /// Identity of the claiming worker
    pub worker_id: String,
    /// Wall-clock time of the claim
    pub locked_at: DateTime<Utc>,
}

impl LockEntry {
    fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            locked_at: Utc::now(),
        }
    }
}

/// File-backed store for the job, lock, and config documents.
pub struct JobStore {
    root: PathBuf,
    jobs_guard: Mutex<()>,
    locks_guard: Mutex<()>,
    config_guard: Mutex<()>,
}

impl JobStore {
    /// Open (creating if necessary) a store rooted at `root`.
    ///
    /// Failure here is the one unrecoverable startup fault in the system;
    /// everything downstream degrades instead of crashing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| JobqError::io(&root, e))?;

        let store = Self {
            root,
            jobs_guard: Mutex::new(()),
            locks_guard: Mutex::new(()),
            config_guard: Mutex::new(()),
        };

        for file in [JOBS_FILE, LOCKS_FILE, CONFIG_FILE] {
            let path = store.root.join(file);
            if fs::metadata(&path).await.is_err() {
                store.replace_document(&path, &HashMap::<String, ()>::new()).await?;
            }
        }

        debug!(root = %store.root.display(), "job store opened");
        Ok(store)
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── document primitives ────────────────────────────────────────────────

    /// Read a full document, returning an empty map if the file is absent.
    async fn read_document<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<HashMap<String, T>> {
        match fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(JobqError::io(path, e)),
        }
    }

    /// Write a full document to a temp file, then atomically rename it into
    /// place.
    async fn replace_document<T: Serialize>(
        &self,
        path: &Path,
        data: &HashMap<String, T>,
    ) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| JobqError::io(&tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| JobqError::io(path, e))?;
        Ok(())
    }

    /// Atomic read-transform-replace of one document, serialized against
    /// other in-process callers by the document's guard.
    async fn update_document<T, R>(
        &self,
        path: &Path,
        guard: &Mutex<()>,
        transform: impl FnOnce(&mut HashMap<String, T>) -> R,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let _held = guard.lock().await;
        let mut data = self.read_document(path).await?;
        let result = transform(&mut data);
        self.replace_document(path, &data).await?;
        Ok(result)
    }

    // ── job table ──────────────────────────────────────────────────────────

    /// Upsert a job into the job table by id.
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let path = self.root.join(JOBS_FILE);
        let record = job.clone();
        self.update_document(&path, &self.jobs_guard, move |jobs| {
            jobs.insert(record.id.to_string(), record);
        })
        .await
    }

    /// Fetch one job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let mut jobs: HashMap<String, Job> =
            self.read_document(&self.root.join(JOBS_FILE)).await?;
        Ok(jobs.remove(&id.to_string()))
    }

    /// The full job table, keyed by id.
    pub async fn get_all_jobs(&self) -> Result<HashMap<String, Job>> {
        self.read_document(&self.root.join(JOBS_FILE)).await
    }

    /// All jobs currently in `state`. Full-table scan; there is no index.
    pub async fn get_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let jobs = self.get_all_jobs().await?;
        Ok(jobs.into_values().filter(|j| j.state == state).collect())
    }

    /// Remove a job from the table. Returns whether it was present.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let path = self.root.join(JOBS_FILE);
        let key = id.to_string();
        self.update_document(&path, &self.jobs_guard, move |jobs: &mut HashMap<String, Job>| {
            jobs.remove(&key).is_some()
        })
        .await
    }

    // ── lock table ─────────────────────────────────────────────────────────

    /// Claim `job_id` for `worker_id`.
    ///
    /// Returns `Ok(true)` and records the claim iff no lock for `job_id`
    /// exists; `Ok(false)` leaves the table untouched. The check and the
    /// insert happen inside one atomic document update.
    pub async fn acquire_lock(&self, job_id: &JobId, worker_id: &str) -> Result<bool> {
        let path = self.root.join(LOCKS_FILE);
        let key = job_id.to_string();
        let entry = LockEntry::new(worker_id);
        self.update_document(&path, &self.locks_guard, move |locks: &mut HashMap<String, LockEntry>| {
            if locks.contains_key(&key) {
                return false;
            }
            locks.insert(key, entry);
            true
        })
        .await
    }

    /// Release the lock on `job_id` if present. Idempotent.
    pub async fn release_lock(&self, job_id: &JobId) -> Result<bool> {
        let path = self.root.join(LOCKS_FILE);
        let key = job_id.to_string();
        self.update_document(&path, &self.locks_guard, move |locks: &mut HashMap<String, LockEntry>| {
            locks.remove(&key).is_some()
        })
        .await
    }

    /// A snapshot of the current lock table.
    pub async fn locks(&self) -> Result<HashMap<String, LockEntry>> {
        self.read_document(&self.root.join(LOCKS_FILE)).await
    }

    /// Remove every lock claimed strictly before `cutoff`, in one atomic
    /// update, returning the pruned entries.
    pub async fn prune_locks(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(String, LockEntry)>> {
        let path = self.root.join(LOCKS_FILE);
        self.update_document(&path, &self.locks_guard, move |locks: &mut HashMap<String, LockEntry>| {
            let expired: Vec<String> = locks
                .iter()
                .filter(|(_, entry)| entry.locked_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|id| locks.remove(&id).map(|entry| (id, entry)))
                .collect()
        })
        .await
    }

    // ── config table ───────────────────────────────────────────────────────

    /// Replace the persisted configuration overlay wholesale.
    pub async fn save_config(&self, config: &HashMap<String, serde_json::Value>) -> Result<()> {
        let path = self.root.join(CONFIG_FILE);
        let snapshot = config.clone();
        self.update_document(&path, &self.config_guard, move |doc| {
            *doc = snapshot;
        })
        .await
    }

    /// Read the persisted configuration overlay.
    pub async fn load_config(&self) -> Result<HashMap<String, serde_json::Value>> {
        self.read_document(&self.root.join(CONFIG_FILE)).await
    }
}
