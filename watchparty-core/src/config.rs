use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Seconds to wait for in-flight connections on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions untouched for this long and without subscribers are evicted
    pub idle_eviction_secs: u64,
    /// How often the eviction sweep runs
    pub eviction_interval_secs: u64,
    /// Maximum inbound WebSocket frame size
    pub max_message_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_eviction_secs: 1800,
            eviction_interval_secs: 60,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// Client-side reconciliation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seeks closer together than this are suppressed
    pub seek_debounce_ms: u64,
    /// Drift tolerated on incoming `play` before forcing a local seek
    pub drift_tolerance_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            seek_debounce_ms: 500,
            drift_tolerance_secs: 2.0,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // WATCHPARTY_SERVER_HTTP_PORT etc.
        builder = builder.add_source(
            Environment::with_prefix("WATCHPARTY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check every setting, returning all problems found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.session.eviction_interval_secs == 0 {
            errors.push("session.eviction_interval_secs must be non-zero".to_string());
        }
        if self.session.max_message_bytes < 1024 {
            errors.push("session.max_message_bytes must be at least 1024".to_string());
        }
        if !(self.sync.drift_tolerance_secs.is_finite() && self.sync.drift_tolerance_secs >= 0.0) {
            errors.push("sync.drift_tolerance_secs must be a non-negative number".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
