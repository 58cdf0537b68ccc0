//! Queue configuration.
//!
//! An explicit structure enumerating every recognized key with its default,
//! persisted through the store's config document. Unknown keys are rejected
//! both at load time (the document must deserialize into this struct) and
//! at set time, instead of silently accepting arbitrary entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{JobqError, Result};
use crate::jobs::job::JobPolicy;
use crate::jobs::store::JobStore;

/// All recognized configuration keys.
pub const CONFIG_KEYS: [&str; 5] = [
    "max_retries",
    "backoff_base",
    "job_timeout",
    "worker_count",
    "log_level",
];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Durable queue settings, loaded at process start and persisted on every
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Default maximum retry attempts for new jobs
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default exponential backoff base for new jobs
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,

    /// Default per-job timeout in seconds
    #[serde(default = "default_job_timeout")]
    pub job_timeout: u64,

    /// Number of workers started by `worker run`
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Log level for the process (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_retries() -> u32 { 3 }
fn default_backoff_base() -> u32 { 2 }
fn default_job_timeout() -> u64 { 30 }
fn default_worker_count() -> usize { 1 }
fn default_log_level() -> String { "info".to_string() }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            job_timeout: default_job_timeout(),
            worker_count: default_worker_count(),
            log_level: default_log_level(),
        }
    }
}

impl QueueConfig {
    /// Load the persisted overlay merged over defaults. Missing keys take
    /// their defaults; unrecognized keys fail validation.
    pub async fn load(store: &JobStore) -> Result<Self> {
        let raw = store.load_config().await?;
        let value = serde_json::Value::Object(raw.into_iter().collect());
        Ok(serde_json::from_value(value)?)
    }

    /// Persist the full configuration.
    pub async fn save(&self, store: &JobStore) -> Result<()> {
        let value = serde_json::to_value(self)?;
        let map: HashMap<String, serde_json::Value> = match value {
            serde_json::Value::Object(obj) => obj.into_iter().collect(),
            _ => HashMap::new(),
        };
        store.save_config(&map).await
    }

    /// Rewrite the persisted configuration with defaults.
    pub async fn reset(store: &JobStore) -> Result<Self> {
        let config = Self::default();
        config.save(store).await?;
        Ok(config)
    }

    /// Read one key's current value, rendered as a string.
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            "max_retries" => Ok(self.max_retries.to_string()),
            "backoff_base" => Ok(self.backoff_base.to_string()),
            "job_timeout" => Ok(self.job_timeout.to_string()),
            "worker_count" => Ok(self.worker_count.to_string()),
            "log_level" => Ok(self.log_level.clone()),
            other => Err(JobqError::UnknownConfigKey(other.to_string())),
        }
    }

    /// Set one key from its string form, validating both the key and the
    /// value's type. Does not persist; pair with [`QueueConfig::save`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || JobqError::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "max_retries" => self.max_retries = value.parse().map_err(|_| invalid())?,
            "backoff_base" => self.backoff_base = value.parse().map_err(|_| invalid())?,
            "job_timeout" => self.job_timeout = value.parse().map_err(|_| invalid())?,
            "worker_count" => self.worker_count = value.parse().map_err(|_| invalid())?,
            "log_level" => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(invalid());
                }
                self.log_level = level;
            }
            other => return Err(JobqError::UnknownConfigKey(other.to_string())),
        }
        Ok(())
    }

    /// All keys with their current values, in declaration order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("max_retries", self.max_retries.to_string()),
            ("backoff_base", self.backoff_base.to_string()),
            ("job_timeout", self.job_timeout.to_string()),
            ("worker_count", self.worker_count.to_string()),
            ("log_level", self.log_level.clone()),
        ]
    }

    /// The default policy applied to newly enqueued jobs.
    pub fn job_policy(&self) -> JobPolicy {
        JobPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            timeout_secs: self.job_timeout,
        }
    }
}
