//! Configuration for the dataset cache, preload scheduler and fetch path
//!
//! Durations are written in milliseconds in config files (`ttl_ms`,
//! `cooldown_ms`, `timeout_ms`), and every section falls back to its defaults
//! for missing fields.

use crate::error::{DashcacheError, Result};
use dashcache_common::{
    parse_bool, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_SIZE, DEFAULT_PRELOAD_COOLDOWN_MS,
    DEFAULT_PRELOAD_MAX_PENDING, DEFAULT_TTL_SECS, ENV_FETCH_TIMEOUT_MS, ENV_JSON_LOGS,
    ENV_LOG_LEVEL, ENV_MAX_SIZE, ENV_PRELOAD_COOLDOWN_MS, ENV_PRELOAD_ENABLED,
    ENV_PRELOAD_MAX_PENDING, ENV_TTL_SECS, LOG_LEVELS, MAX_TTL_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Cache store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time to live for cached datasets
    #[serde(rename = "ttl_ms", with = "millis")]
    pub ttl: Duration,
    /// Maximum number of cached datasets
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self { ttl, max_size }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Speculative preload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Whether successful fetches schedule related queries
    pub enabled: bool,
    /// Pause before each preload fetch
    #[serde(rename = "cooldown_ms", with = "millis")]
    pub cooldown: Duration,
    /// Upper bound on queued candidates; extra candidates are dropped
    pub max_pending: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_millis(DEFAULT_PRELOAD_COOLDOWN_MS),
            max_pending: DEFAULT_PRELOAD_MAX_PENDING,
        }
    }
}

impl PreloadConfig {
    /// Preloading switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

/// Dataset source call configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on a single source call; `None` waits indefinitely
    #[serde(rename = "timeout_ms", with = "opt_millis")]
    pub timeout: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS)),
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    #[must_use]
    pub fn without_timeout() -> Self {
        Self { timeout: None }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Complete dashcache configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashcacheConfig {
    pub cache: CacheConfig,
    pub preload: PreloadConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

impl DashcacheConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DASHCACHE_*` environment variables
    ///
    /// # Errors
    /// Returns an error if an environment variable holds an unparsable value
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields from `DASHCACHE_*` environment variables that are set
    ///
    /// # Errors
    /// Returns an error if an environment variable holds an unparsable value
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(secs) = env_number::<u64>(ENV_TTL_SECS)? {
            self.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(max_size) = env_number::<usize>(ENV_MAX_SIZE)? {
            self.cache.max_size = max_size;
        }
        if let Ok(enabled) = std::env::var(ENV_PRELOAD_ENABLED) {
            self.preload.enabled = parse_bool(&enabled);
        }
        if let Some(ms) = env_number::<u64>(ENV_PRELOAD_COOLDOWN_MS)? {
            self.preload.cooldown = Duration::from_millis(ms);
        }
        if let Some(max_pending) = env_number::<usize>(ENV_PRELOAD_MAX_PENDING)? {
            self.preload.max_pending = max_pending;
        }
        if let Ok(timeout) = std::env::var(ENV_FETCH_TIMEOUT_MS) {
            // "0" or "none" turns the timeout off
            let timeout = timeout.trim();
            self.fetch.timeout = if timeout == "0" || timeout.eq_ignore_ascii_case("none") {
                None
            } else {
                let ms = timeout.parse::<u64>().map_err(|_| {
                    DashcacheError::configuration(format!("Invalid {ENV_FETCH_TIMEOUT_MS} value"))
                })?;
                Some(Duration::from_millis(ms))
            };
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level.trim().to_lowercase();
        }
        if let Ok(json_logs) = std::env::var(ENV_JSON_LOGS) {
            self.logging.json_logs = parse_bool(&json_logs);
        }
        Ok(())
    }

    /// Load configuration from a JSON or YAML file (picked by extension)
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let value = read_config_value(path.as_ref())?;
        Ok(serde_json::from_value(value)?)
    }

    /// Save configuration to a file
    ///
    /// # Errors
    /// Returns an error if the format is unsupported or the file cannot be written
    pub fn to_file<P: AsRef<Path>>(&self, path: P, format: &str) -> Result<()> {
        let content = match format {
            "yaml" | "yml" => serde_yaml::to_string(self).map_err(|e| {
                DashcacheError::configuration(format!("Failed to serialize YAML: {e}"))
            })?,
            "json" => serde_json::to_string_pretty(self)?,
            _ => {
                return Err(DashcacheError::configuration(format!(
                    "Unsupported format: {format}"
                )))
            }
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns an error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(DashcacheError::configuration(
                "Cache max size must be greater than 0",
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(DashcacheError::configuration(
                "Cache TTL must be greater than 0",
            ));
        }
        if self.cache.ttl > Duration::from_secs(MAX_TTL_SECS) {
            return Err(DashcacheError::configuration(format!(
                "Cache TTL must be at most {MAX_TTL_SECS} seconds"
            )));
        }
        if self.fetch.timeout.is_some_and(|t| t.is_zero()) {
            return Err(DashcacheError::configuration(
                "Fetch timeout must be greater than 0 when set",
            ));
        }
        if self.preload.enabled && self.preload.max_pending == 0 {
            return Err(DashcacheError::configuration(
                "Preload queue bound must be greater than 0 when preloading is enabled",
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(DashcacheError::configuration(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// Read a JSON or YAML file into a JSON value tree
pub(crate) fn read_config_value(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DashcacheError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read config file {}: {e}", path.display()),
        ))
    })?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| {
            DashcacheError::configuration(format!("Failed to parse YAML config: {e}"))
        }),
        _ => serde_json::from_str(&content).map_err(|e| {
            DashcacheError::configuration(format!("Failed to parse JSON config: {e}"))
        }),
    }
}

fn env_number<N: std::str::FromStr>(name: &str) -> Result<Option<N>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DashcacheError::configuration(format!("Invalid {name} value"))),
        Err(_) => Ok(None),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        let ms = value.as_millis() as u64;
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        let ms = value.map(|d| d.as_millis() as u64);
        match ms {
            Some(ms) => serializer.serialize_some(&ms),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for name in [
            ENV_TTL_SECS,
            ENV_MAX_SIZE,
            ENV_PRELOAD_ENABLED,
            ENV_PRELOAD_COOLDOWN_MS,
            ENV_PRELOAD_MAX_PENDING,
            ENV_FETCH_TIMEOUT_MS,
            ENV_LOG_LEVEL,
            ENV_JSON_LOGS,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config() {
        let config = DashcacheConfig::default();
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_size, 100);
        assert!(config.preload.enabled);
        assert_eq!(config.preload.cooldown, Duration::from_millis(500));
        assert_eq!(config.fetch.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::default()
            .with_ttl(Duration::from_secs(5))
            .with_max_size(2);
        assert_eq!(config, CacheConfig::new(Duration::from_secs(5), 2));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DashcacheConfig::default();
        config.cache.max_size = 0;
        assert!(config.validate().is_err());

        let mut config = DashcacheConfig::default();
        config.cache.ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = DashcacheConfig::default();
        config.cache.ttl = Duration::from_secs(MAX_TTL_SECS + 1);
        assert!(config.validate().unwrap_err().to_string().contains("at most"));
        config.cache.ttl = Duration::from_secs(MAX_TTL_SECS);
        assert!(config.validate().is_ok());

        let mut config = DashcacheConfig::default();
        config.fetch.timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        let mut config = DashcacheConfig::default();
        config.preload.max_pending = 0;
        assert!(config.validate().is_err());
        config.preload.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = DashcacheConfig::default();
        config.logging.level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_json_uses_millisecond_fields() {
        let json = serde_json::to_value(DashcacheConfig::default()).unwrap();
        assert_eq!(json["cache"]["ttl_ms"], 300_000);
        assert_eq!(json["preload"]["cooldown_ms"], 500);
        assert_eq!(json["fetch"]["timeout_ms"], 10_000);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: DashcacheConfig =
            serde_json::from_str(r#"{"cache":{"max_size":7},"fetch":{"timeout_ms":null}}"#)
                .unwrap();
        assert_eq!(config.cache.max_size, 7);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.fetch.timeout, None);
        assert!(config.preload.enabled);
    }

    #[test]
    fn test_config_to_and_from_file_json() {
        let file = NamedTempFile::with_suffix(".json").unwrap();
        let mut config = DashcacheConfig::default();
        config.cache.max_size = 42;
        config.preload = PreloadConfig::disabled();

        config.to_file(file.path(), "json").unwrap();
        let loaded = DashcacheConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_to_and_from_file_yaml() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let mut config = DashcacheConfig::default();
        config.cache.ttl = Duration::from_secs(30);
        config.fetch = FetchConfig::without_timeout();

        config.to_file(file.path(), "yaml").unwrap();
        let loaded = DashcacheConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_format() {
        let file = NamedTempFile::new().unwrap();
        let err = DashcacheConfig::default()
            .to_file(file.path(), "toml")
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported format"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DashcacheConfig::from_file("/nonexistent/dashcache.json").unwrap_err();
        assert!(matches!(err, DashcacheError::Io(_)));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var(ENV_TTL_SECS, "60");
        std::env::set_var(ENV_MAX_SIZE, "8");
        std::env::set_var(ENV_PRELOAD_ENABLED, "off");
        std::env::set_var(ENV_PRELOAD_COOLDOWN_MS, "250");
        std::env::set_var(ENV_FETCH_TIMEOUT_MS, "none");
        std::env::set_var(ENV_LOG_LEVEL, "DEBUG");
        std::env::set_var(ENV_JSON_LOGS, "1");

        let config = DashcacheConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.max_size, 8);
        assert!(!config.preload.enabled);
        assert_eq!(config.preload.cooldown, Duration::from_millis(250));
        assert_eq!(config.fetch.timeout, None);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_logs);
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_number() {
        clear_env();
        std::env::set_var(ENV_MAX_SIZE, "lots");

        let result = DashcacheConfig::from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_SIZE));
    }
}
