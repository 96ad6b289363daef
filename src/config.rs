//! Runtime Configuration
//!
//! Handles parsing and management of node-compat.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file searched for on startup.
pub const CONFIG_FILE_NAME: &str = "node-compat.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching node-compat.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Worker pool settings
    #[serde(default)]
    pub runtime: WorkerConfig,

    /// Buffer allocation settings
    #[serde(default)]
    pub buffer: BufferConfig,

    /// File-system settings
    #[serde(default)]
    pub fs: FsConfig,
}

impl RuntimeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "runtime.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.fs.watch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "fs.watch_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Number of worker threads executing async operations
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Thread name prefix
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 16)
}

fn default_thread_name() -> String {
    "node-compat-worker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

/// Buffer allocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Released allocations kept for reuse by `alloc_unsafe`
    #[serde(default = "default_pool_slots")]
    pub pool_slots: usize,

    /// Largest allocation returned to the pool
    #[serde(default = "default_pool_max_bytes")]
    pub pool_max_bytes: usize,
}

fn default_pool_slots() -> usize {
    64
}

fn default_pool_max_bytes() -> usize {
    64 * 1024
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pool_slots: default_pool_slots(),
            pool_max_bytes: default_pool_max_bytes(),
        }
    }
}

/// File-system configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FsConfig {
    /// Default polling interval for `watch_file`
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    /// Base delay between `rm` retries
    #[serde(default = "default_rm_retry_delay_ms")]
    pub rm_retry_delay_ms: u64,
}

fn default_watch_interval_ms() -> u64 {
    5007
}

fn default_rm_retry_delay_ms() -> u64 {
    100
}

impl FsConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn rm_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rm_retry_delay_ms)
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            watch_interval_ms: default_watch_interval_ms(),
            rm_retry_delay_ms: default_rm_retry_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.runtime.worker_threads >= 1);
        assert_eq!(config.buffer.pool_slots, 64);
        assert_eq!(config.fs.watch_interval_ms, 5007);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[runtime]
worker_threads = 2
thread_name = "fs-io"

[buffer]
pool_slots = 8

[fs]
watch_interval_ms = 50
"#;
        let config = RuntimeConfig::parse(toml_str).unwrap();
        assert_eq!(config.runtime.worker_threads, 2);
        assert_eq!(config.runtime.thread_name, "fs-io");
        assert_eq!(config.buffer.pool_slots, 8);
        assert_eq!(config.buffer.pool_max_bytes, 64 * 1024);
        assert_eq!(config.fs.watch_interval(), Duration::from_millis(50));
        assert_eq!(config.fs.rm_retry_delay_ms, 100);
    }

    #[test]
    fn test_reject_zero_workers() {
        let result = RuntimeConfig::parse("[runtime]\nworker_threads = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_find_and_load_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::find_and_load(dir.path()).unwrap();
        assert_eq!(config.buffer, BufferConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = RuntimeConfig::default();
        config.fs.watch_interval_ms = 250;
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
