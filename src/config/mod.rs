/// Configuration management for the nodeflow engine
///
/// Handles engine limits, workflow/execution storage locations and logging.
/// Every value can be overridden through a `NODEFLOW_*` environment variable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Execution behaviour
    pub engine: EngineConfig,
    /// Where workflows come from and executions go
    pub store: StoreConfig,
    /// Log output
    pub log: LogConfig,
}

/// Engine policies applied to every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-node timeout; `timeout_ms` in a node's config overrides it
    pub node_timeout_ms: Option<u64>,
    /// Wall-clock guard across all layers
    pub execution_timeout_ms: Option<u64>,
    /// Limit on a single routing call
    pub router_timeout_ms: Option<u64>,
    /// Stop scheduling new layers after the first node failure
    pub fail_fast: bool,
    /// Default routing mode when neither workflow nor node says otherwise
    pub intelligent_routing: bool,
    /// Capacity of the progress channel; events beyond it are dropped
    pub progress_buffer: usize,
}

/// Workflow and execution storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `{workflow_id}.json` files (default: "workflows")
    pub workflow_dir: String,
    /// Optional SQLite url for execution history (e.g. "sqlite://nodeflow.db")
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: None,
            execution_timeout_ms: None,
            router_timeout_ms: None,
            fail_fast: false,
            intelligent_routing: false,
            progress_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Engine configuration from `NODEFLOW_*` variables over the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            node_timeout_ms: env_parse("NODEFLOW_NODE_TIMEOUT_MS"),
            execution_timeout_ms: env_parse("NODEFLOW_EXECUTION_TIMEOUT_MS"),
            router_timeout_ms: env_parse("NODEFLOW_ROUTER_TIMEOUT_MS"),
            fail_fast: env_bool("NODEFLOW_FAIL_FAST").unwrap_or(defaults.fail_fast),
            intelligent_routing: env_bool("NODEFLOW_INTELLIGENT_ROUTING").unwrap_or(defaults.intelligent_routing),
            progress_buffer: env_parse("NODEFLOW_PROGRESS_BUFFER").unwrap_or(defaults.progress_buffer).max(1),
        }
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    pub fn router_timeout(&self) -> Option<Duration> {
        self.router_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            store: StoreConfig {
                workflow_dir: std::env::var("NODEFLOW_WORKFLOW_DIR").unwrap_or_else(|_| "workflows".to_string()),
                database_url: std::env::var("NODEFLOW_DATABASE_URL").ok().filter(|url| !url.is_empty()),
            },
            log: LogConfig {
                level: std::env::var("NODEFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        }
    }
}

impl LogConfig {
    /// Parsed level, falling back to INFO for unknown values
    pub fn max_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert!(!config.fail_fast);
        assert!(!config.intelligent_routing);
        assert_eq!(config.progress_buffer, 256);
        assert!(config.node_timeout().is_none());
    }

    #[test]
    fn test_log_level_fallback() {
        assert_eq!(LogConfig { level: "debug".into() }.max_level(), tracing::Level::DEBUG);
        assert_eq!(LogConfig { level: "chatty".into() }.max_level(), tracing::Level::INFO);
    }
}
