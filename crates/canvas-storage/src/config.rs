//! Storage configuration.
//!
//! [`StorageConfig`] carries the retry policy applied by the adapters, the
//! size of the version-promotion worker pool, and whether chat threads are
//! copied on promotion. It can be deserialized from any serde source or read
//! from `CANVAS_*` environment variables with [`StorageConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

/// Configuration for [`crate::coordinator::CanvasCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub retry: RetryPolicy,
    /// Worker threads used to copy entities during version promotion.
    pub copy_workers: usize,
    /// Copy chat threads into promoted versions.
    pub copy_chat_threads: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            retry: RetryPolicy::default(),
            copy_workers: 8,
            copy_chat_threads: true,
        }
    }
}

impl StorageConfig {
    /// Reads overrides from the environment on top of the defaults:
    ///
    /// - `CANVAS_RETRY_MAX_ATTEMPTS`
    /// - `CANVAS_RETRY_INITIAL_BACKOFF_MS`
    /// - `CANVAS_RETRY_MAX_BACKOFF_MS`
    /// - `CANVAS_COPY_WORKERS`
    /// - `CANVAS_COPY_CHAT_THREADS` (`true`/`false`)
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StorageError> {
        let mut config = StorageConfig::default();
        if let Some(v) = parse_var(&lookup, "CANVAS_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "CANVAS_RETRY_INITIAL_BACKOFF_MS")? {
            config.retry.initial_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CANVAS_RETRY_MAX_BACKOFF_MS")? {
            config.retry.max_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CANVAS_COPY_WORKERS")? {
            config.copy_workers = v;
        }
        if let Some(v) = parse_var(&lookup, "CANVAS_COPY_CHAT_THREADS")? {
            config.copy_chat_threads = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the adapters cannot run with.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.retry.max_attempts == 0 {
            return Err(StorageError::Store(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.copy_workers == 0 {
            return Err(StorageError::Store(
                "copy_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, StorageError>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| StorageError::Store(format!("invalid {}='{}': {}", name, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = StorageConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StorageConfig::default());
        assert!(config.copy_chat_threads);
    }

    #[test]
    fn env_overrides() {
        let config = StorageConfig::from_lookup(lookup(&[
            ("CANVAS_RETRY_MAX_ATTEMPTS", "7"),
            ("CANVAS_COPY_WORKERS", "2"),
            ("CANVAS_COPY_CHAT_THREADS", "false"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.copy_workers, 2);
        assert!(!config.copy_chat_threads);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(StorageConfig::from_lookup(lookup(&[("CANVAS_COPY_WORKERS", "many")])).is_err());
        assert!(StorageConfig::from_lookup(lookup(&[("CANVAS_COPY_WORKERS", "0")])).is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"retry":{"max_attempts":2}}"#).unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.copy_workers, 8);
    }
}
