//! Structured logging setup
//!
//! Library code only emits `tracing` events; hosts call [`init_tracing`] once
//! at startup to install a subscriber. With the `observability` feature the
//! cache and preload paths also record `metrics` counters.

use crate::config::LoggingConfig;
use crate::error::{DashcacheError, Result};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Metric names recorded with the `observability` feature
pub mod metric_names {
    pub const CACHE_HITS: &str = "dashcache_cache_hits_total";
    pub const CACHE_MISSES: &str = "dashcache_cache_misses_total";
    pub const CACHE_EVICTIONS: &str = "dashcache_cache_evictions_total";
    pub const PRELOAD_COMPLETED: &str = "dashcache_preload_completed_total";
    pub const PRELOAD_FAILED: &str = "dashcache_preload_failed_total";
}

/// Filter from `RUST_LOG`, falling back to the configured level
///
/// # Errors
/// Returns a configuration error if the configured level is not a valid level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    config.level.parse::<Level>().map_err(|e| {
        DashcacheError::configuration(format!("Invalid log level {}: {e}", config.level))
    })?;

    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)))
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns an error for an invalid level, or when a global subscriber is
/// already installed
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_logs {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true);
        registry.with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(fmt_layer).try_init()
    };

    installed.map_err(|e| {
        DashcacheError::configuration(format!("Failed to initialize tracing: {e}"))
    })?;

    info!("Tracing initialized with level: {}", config.level);
    Ok(())
}
