use std::env;
use std::time::Duration;

use crate::error::RollupError;

/// Whether triggered node sets are recomputed in the handler or handed to the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    Async,
}

impl DispatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Some(DispatchMode::Inline),
            "async" => Some(DispatchMode::Async),
            _ => None,
        }
    }
}

/// Explicit capabilities handed to the rollup update service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupConfig {
    /// Nodes per batch; each batch is one transaction.
    pub batch_size: usize,
    /// Write-through to the legacy epic representation.
    pub legacy_mirror: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            legacy_mirror: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Attempts before a job is dead-lettered.
    pub max_attempts: i32,
    /// Idle poll interval, also the unit of retry back-off.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub rollup: RollupConfig,
    pub dispatch_mode: DispatchMode,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, RollupError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RollupError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RollupError::Config("DATABASE_URL environment variable is required".into()))?;

        let defaults = RollupConfig::default();
        let batch_size = parse_or(&lookup, "ROLLUP_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(RollupError::Config("ROLLUP_BATCH_SIZE must be at least 1".into()));
        }
        let legacy_mirror = match lookup("ROLLUP_LEGACY_MIRROR") {
            None => defaults.legacy_mirror,
            Some(v) => parse_bool(&v).ok_or_else(|| {
                RollupError::Config(format!("ROLLUP_LEGACY_MIRROR must be a boolean, got {v:?}"))
            })?,
        };

        let dispatch_mode = match lookup("ROLLUP_DISPATCH_MODE") {
            None => DispatchMode::Async,
            Some(v) => DispatchMode::parse(&v).ok_or_else(|| {
                RollupError::Config(format!("ROLLUP_DISPATCH_MODE must be inline or async, got {v:?}"))
            })?,
        };

        let worker_defaults = WorkerConfig::default();
        let max_attempts = parse_or(&lookup, "ROLLUP_MAX_ATTEMPTS", worker_defaults.max_attempts)?;
        if max_attempts < 1 {
            return Err(RollupError::Config("ROLLUP_MAX_ATTEMPTS must be at least 1".into()));
        }
        let poll_ms = parse_or(
            &lookup,
            "ROLLUP_POLL_INTERVAL_MS",
            worker_defaults.poll_interval.as_millis() as u64,
        )?;

        Ok(Self {
            database_url,
            rollup: RollupConfig {
                batch_size,
                legacy_mirror,
            },
            dispatch_mode,
            worker: WorkerConfig {
                max_attempts,
                poll_interval: Duration::from_millis(poll_ms),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, RollupError> {
    match lookup(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| RollupError::Config(format!("{key} must be a number, got {v:?}"))),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/rollup")])).unwrap();
        assert_eq!(config.rollup, RollupConfig::default());
        assert_eq!(config.dispatch_mode, DispatchMode::Async);
        assert_eq!(config.worker, WorkerConfig::default());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, RollupError::Config(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db"),
            ("ROLLUP_BATCH_SIZE", "25"),
            ("ROLLUP_LEGACY_MIRROR", "off"),
            ("ROLLUP_DISPATCH_MODE", "Inline"),
            ("ROLLUP_MAX_ATTEMPTS", "3"),
            ("ROLLUP_POLL_INTERVAL_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(config.rollup.batch_size, 25);
        assert!(!config.rollup.legacy_mirror);
        assert_eq!(config.dispatch_mode, DispatchMode::Inline);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.worker.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://db"), ("ROLLUP_BATCH_SIZE", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("ROLLUP_BATCH_SIZE"));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://db"), ("ROLLUP_MAX_ATTEMPTS", "many")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://db"), ("ROLLUP_LEGACY_MIRROR", "maybe")])).is_err());
    }
}
