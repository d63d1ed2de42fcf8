//! Engine configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Whether optional/nonempty type quantifiers are checked strictly.
    ///
    /// Disabling this accepts legacy documents that conflate `T` and `T?`.
    pub check_quant: CheckQuant,
    /// Task execution settings.
    pub task_runtime: TaskRuntimeConfig,
    /// Workflow scheduling settings.
    pub scheduler: SchedulerConfig,
    /// Download cache settings.
    pub download_cache: CacheConfig,
}

/// Wrapper for the `check_quant` switch defaulting to strict.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(transparent)]
pub struct CheckQuant(pub bool);

impl Default for CheckQuant {
    fn default() -> Self {
        Self(true)
    }
}

/// Task execution configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskRuntimeConfig {
    /// A regular expression every placeholder expansion in a command must
    /// fully match.
    ///
    /// Expansions violating the pattern fail the task with an input error.
    pub placeholder_regex: Option<String>,
    /// The shell used to run task commands (defaults to `bash`).
    pub shell: Option<String>,
    /// The default `maxRetries` when a task does not specify one.
    pub default_max_retries: u32,
    /// The default `preemptible` budget when a task does not specify one.
    pub default_preemptible: u32,
}

/// Workflow scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// The maximum number of concurrently running task containers.
    ///
    /// Zero selects the backend's maximum concurrency.
    pub concurrency: usize,
    /// The grace period, in seconds, between a stop request and forceful
    /// termination during cancellation.
    pub stop_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            stop_grace_seconds: 10,
        }
    }
}

/// Download cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether downloaded files are stored into the cache.
    pub put: bool,
    /// Whether cached files are used instead of re-downloading.
    pub get: bool,
    /// The cache directory.
    pub dir: PathBuf,
    /// Glob patterns of URIs eligible for caching.
    pub enable_patterns: Vec<String>,
    /// Glob patterns of URIs excluded from caching.
    pub disable_patterns: Vec<String>,
    /// Whether query strings are ignored when forming cache keys.
    ///
    /// When false (the default), a URI carrying a query string bypasses the
    /// cache entirely.
    pub ignore_query: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            put: false,
            get: false,
            dir: PathBuf::from("~/.cache/sluice/download"),
            enable_patterns: vec!["*".to_string()],
            disable_patterns: Vec::new(),
            ignore_query: false,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.check_quant.0);
        assert_eq!(config.scheduler.concurrency, 0);
        assert!(!config.download_cache.put);
        assert_eq!(config.download_cache.enable_patterns, ["*"]);
    }

    #[test]
    fn deserialization() {
        let config: Config = serde_json::from_str(
            r#"{
                "check_quant": false,
                "task_runtime": { "placeholder_regex": "[^']*" },
                "scheduler": { "concurrency": 4 },
                "download_cache": { "put": true, "get": true, "dir": "/tmp/cache" }
            }"#,
        )
        .expect("config should deserialize");

        assert!(!config.check_quant.0);
        assert_eq!(
            config.task_runtime.placeholder_regex.as_deref(),
            Some("[^']*")
        );
        assert_eq!(config.scheduler.concurrency, 4);
        assert!(config.download_cache.put);
    }
}
