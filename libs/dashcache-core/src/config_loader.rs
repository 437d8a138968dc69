//! Configuration Loader
//!
//! Layers configuration from defaults, files and environment variables.
//! Files are merged field by field, so a file only needs the keys it changes.

use crate::config::{read_config_value, DashcacheConfig};
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration loader that handles multiple sources with precedence
pub struct ConfigLoader {
    /// Base configuration
    base_config: DashcacheConfig,
    /// Configuration file paths, later files win
    config_paths: Vec<PathBuf>,
    /// Whether to apply `DASHCACHE_*` environment variables
    load_from_env: bool,
    /// Whether to validate the final configuration
    validate: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_config: DashcacheConfig::default(),
            config_paths: Self::get_default_config_paths(),
            load_from_env: true,
            validate: true,
        }
    }

    /// Set the base configuration
    #[must_use]
    pub fn with_base_config(mut self, config: DashcacheConfig) -> Self {
        self.base_config = config;
        self
    }

    /// Add a configuration file path
    #[must_use]
    pub fn add_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Set configuration file paths
    #[must_use]
    pub fn with_config_paths<P: AsRef<Path>>(mut self, paths: Vec<P>) -> Self {
        self.config_paths = paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        self
    }

    /// Disable loading from environment variables
    #[must_use]
    pub fn without_env_loading(mut self) -> Self {
        self.load_from_env = false;
        self
    }

    /// Enable or disable loading from environment variables
    #[must_use]
    pub fn with_env_loading(mut self, enabled: bool) -> Self {
        self.load_from_env = enabled;
        self
    }

    /// Enable or disable configuration validation
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    /// Load configuration from all sources
    ///
    /// Unreadable files and bad environment values are logged and skipped.
    ///
    /// # Errors
    /// Returns an error if the merged configuration is invalid
    pub fn load(&self) -> Result<DashcacheConfig> {
        info!("Starting configuration loading process");
        let mut merged = serde_json::to_value(&self.base_config)?;

        for path in &self.config_paths {
            if !path.exists() {
                debug!("Configuration file not found: {}", path.display());
                continue;
            }
            debug!("Loading configuration from file: {}", path.display());
            match read_config_value(path) {
                Ok(layer) => {
                    merge_values(&mut merged, layer);
                    info!("Loaded configuration from: {}", path.display());
                }
                Err(e) => {
                    warn!(
                        "Failed to load configuration from {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        let mut config: DashcacheConfig = match serde_json::from_value(merged) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring configuration files with invalid values: {}", e);
                self.base_config.clone()
            }
        };

        if self.load_from_env {
            debug!("Applying environment overrides");
            let mut with_env = config.clone();
            match with_env.apply_env_overrides() {
                Ok(()) => config = with_env,
                Err(e) => warn!("Failed to apply environment overrides: {}", e),
            }
        }

        if self.validate {
            debug!("Validating final configuration");
            config.validate()?;
        }

        info!(
            ttl_ms = config.cache.ttl.as_millis() as u64,
            max_size = config.cache.max_size,
            preload = config.preload.enabled,
            "Configuration loading completed"
        );
        Ok(config)
    }

    /// Default configuration file paths, lowest precedence first
    #[must_use]
    pub fn get_default_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for dir in [Self::get_system_config_dir(), Self::get_user_config_dir()] {
            paths.push(dir.join("dashcache.json"));
            paths.push(dir.join("dashcache.yaml"));
            paths.push(dir.join("dashcache.yml"));
        }
        paths.push(PathBuf::from("dashcache.json"));
        paths.push(PathBuf::from("dashcache.yaml"));
        paths.push(PathBuf::from("dashcache.yml"));
        paths
    }

    /// Get the user configuration directory
    #[must_use]
    pub fn get_user_config_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".config").join("dashcache")
        } else if let Ok(userprofile) = std::env::var("USERPROFILE") {
            PathBuf::from(userprofile)
                .join("AppData")
                .join("Roaming")
                .join("dashcache")
        } else {
            PathBuf::from("~/.config/dashcache")
        }
    }

    /// Get the system configuration directory
    #[must_use]
    pub fn get_system_config_dir() -> PathBuf {
        if cfg!(target_os = "macos") {
            PathBuf::from("/Library/Application Support/dashcache")
        } else if cfg!(target_os = "windows") {
            PathBuf::from("C:\\ProgramData\\dashcache")
        } else {
            PathBuf::from("/etc/dashcache")
        }
    }

    /// Write the default configuration as a sample file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created
    pub fn create_sample_config<P: AsRef<Path>>(path: P, format: &str) -> Result<()> {
        DashcacheConfig::default().to_file(path, format)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively overlay `layer` onto `base`; objects merge, everything else replaces
fn merge_values(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Load configuration from the default locations
///
/// # Errors
/// Returns an error if the loaded configuration is invalid
pub fn load_config() -> Result<DashcacheConfig> {
    ConfigLoader::new().load()
}

/// Load configuration with custom paths
///
/// # Errors
/// Returns an error if the loaded configuration is invalid
pub fn load_config_with_paths<P: AsRef<Path>>(config_paths: Vec<P>) -> Result<DashcacheConfig> {
    ConfigLoader::new().with_config_paths(config_paths).load()
}
