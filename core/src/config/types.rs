use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tasks: TaskManagerConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "objtask_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Scheduler knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// Ceiling on simultaneously running tasks. Values below 1 are treated as 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retries after the first attempt; a task runs at most `max_retries + 1` times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed wait before a failed attempt is re-queued.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl TaskManagerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files of at least this size go through multipart upload; it is also
    /// the part size.
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
}

fn default_chunk_size_mb() -> u64 {
    16
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
        }
    }
}

impl UploadConfig {
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb.max(1) * 1024 * 1024
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Buckets are directories under `root`.
    Local,
    /// Process-local store, nothing is persisted.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Storage root for the local transport. Empty means `~/.objtask/storage`.
    #[serde(default)]
    pub root: Option<String>,
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Local
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.tasks, TaskManagerConfig::default());
        assert_eq!(cfg.tasks.max_concurrent, 4);
        assert_eq!(cfg.tasks.retry_delay(), Duration::from_secs(1));
        assert_eq!(cfg.upload.chunk_size_bytes(), 16 * 1024 * 1024);
        assert_eq!(cfg.transport.kind, TransportKind::Local);
        assert!(cfg.logging.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [tasks]
            max_concurrent = 8

            [transport]
            kind = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tasks.max_concurrent, 8);
        assert_eq!(cfg.tasks.max_retries, 3);
        assert_eq!(cfg.transport.kind, TransportKind::Memory);
    }

    #[test]
    fn test_chunk_size_has_floor() {
        let cfg = UploadConfig { chunk_size_mb: 0 };
        assert_eq!(cfg.chunk_size_bytes(), 1024 * 1024);
    }
}
