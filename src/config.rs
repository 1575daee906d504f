//! Application configuration.
//!
//! Loaded from a YAML file; every section and field falls back to its default so
//! a partial file is always usable. A missing file is reported to the caller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub adb: AdbConfig,
    pub image_matching: MatchConfig,
    pub screenshot: CaptureConfig,
    pub humanizer: HumanizerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path`. `Ok(None)` means there is no file; callers fall back
    /// to the defaults once logging is up so the fact can be reported.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    /// Explicit path to `adb`, or "auto" to search.
    pub adb_path: String,
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    /// Reconnect-and-retry attempts for a failed shell command.
    pub retries: u32,
    /// Download platform-tools when no usable `adb` is found.
    pub auto_fetch: bool,
    pub reconnect_pause_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: "auto".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5555,
            timeout_secs: 10,
            retries: 2,
            auto_fetch: true,
            reconnect_pause_ms: 500,
        }
    }
}

impl AdbConfig {
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_millis(self.reconnect_pause_ms)
    }
}

/// Comparison metric used by the template matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Zero-mean normalized cross-correlation.
    CcoeffNormed,
    /// Normalized cross-correlation without mean removal.
    CcorrNormed,
    /// Normalized squared difference; a distance, reported as `1 - d`.
    SqdiffNormed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Confidence threshold for template matching (0.0 to 1.0)
    pub confidence_threshold: f32,
    pub method: MatchMethod,
    pub use_grayscale: bool,
    /// Retry across the scale ladder when the 1:1 match misses
    pub multi_scale: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            method: MatchMethod::CcoeffNormed,
            use_grayscale: true,
            multi_scale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub cache_ttl_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { cache_ttl_ms: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizerConfig {
    /// Jitter radius in pixels when no match region is known.
    pub click_offset_range: u32,
    pub min_delay: f64,
    pub max_delay: f64,
    pub min_hold_ms: u32,
    pub max_hold_ms: u32,
    pub long_pause_chance: f64,
    pub long_pause_min: f64,
    pub long_pause_max: f64,
    pub enable_jitter: bool,
}

impl Default for HumanizerConfig {
    fn default() -> Self {
        Self {
            click_offset_range: 5,
            min_delay: 0.3,
            max_delay: 1.2,
            min_hold_ms: 50,
            max_hold_ms: 150,
            long_pause_chance: 0.08,
            long_pause_min: 2.0,
            long_pause_max: 5.0,
            enable_jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pause_poll_ms: u64,
    pub error_cooldown_ms: u64,
    pub join_timeout_secs: u64,
    pub queue_gap_ms: u64,
    pub background_tick_ms: u64,
    pub wait_for_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pause_poll_ms: 100,
            error_cooldown_ms: 1000,
            join_timeout_secs: 5,
            queue_gap_ms: 1000,
            background_tick_ms: 100,
            wait_for_poll_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn queue_gap(&self) -> Duration {
        Duration::from_millis(self.queue_gap_ms)
    }

    pub fn background_tick(&self) -> Duration {
        Duration::from_millis(self.background_tick_ms.max(1))
    }

    pub fn wait_for_poll(&self) -> Duration {
        Duration::from_millis(self.wait_for_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter spec understood by env_logger, e.g. "info" or "android_macro_run=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        assert_eq!(AppConfig::from_yaml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let raw = "adb:\n  port: 7555\nimage_matching:\n  method: sqdiff_normed\n";
        let config = AppConfig::from_yaml(raw).unwrap();
        assert_eq!(config.adb.port, 7555);
        assert_eq!(config.adb.host, "127.0.0.1");
        assert_eq!(config.adb.retries, 2);
        assert_eq!(config.image_matching.method, MatchMethod::SqdiffNormed);
        assert_eq!(config.image_matching.confidence_threshold, 0.85);
        assert_eq!(config.screenshot.cache_ttl_ms, 100);
    }

    #[test]
    fn missing_file_is_reported_not_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(AppConfig::load(&dir.path().join("nope.yaml")).unwrap(), None);

        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: debug\n").unwrap();
        let config = AppConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.adb, AdbConfig::default());
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "adb: [1, 2").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn target_joins_host_and_port() {
        assert_eq!(AdbConfig::default().target(), "127.0.0.1:5555");
    }
}
