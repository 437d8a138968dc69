//! Constants shared across the dashcache crates

/// Default time-to-live for cached datasets, in seconds
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Longest accepted cache TTL, in seconds (one year)
pub const MAX_TTL_SECS: u64 = 366 * 24 * 60 * 60;

/// Default maximum number of cached datasets
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default pause before each speculative preload fetch, in milliseconds
pub const DEFAULT_PRELOAD_COOLDOWN_MS: u64 = 500;

/// Default bound on pending preload candidates
pub const DEFAULT_PRELOAD_MAX_PENDING: usize = 32;

/// Default timeout for a single dataset computation, in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Namespace used for dataset query keys
pub const DATASET_NAMESPACE: &str = "dataset";

/// Placeholder written for an absent date-range bound
pub const OPEN_BOUND_SENTINEL: &str = "*";

/// Date format used in query keys and config files
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accepted log levels
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// Environment variables read by `DashcacheConfig::from_env`

/// Cache TTL override, in seconds
pub const ENV_TTL_SECS: &str = "DASHCACHE_TTL_SECS";

/// Cache capacity override
pub const ENV_MAX_SIZE: &str = "DASHCACHE_MAX_SIZE";

/// Turns speculative preloading on or off (`true`, `1`, `yes` or `on` enable it)
pub const ENV_PRELOAD_ENABLED: &str = "DASHCACHE_PRELOAD_ENABLED";

/// Pause before each preload fetch, in milliseconds
pub const ENV_PRELOAD_COOLDOWN_MS: &str = "DASHCACHE_PRELOAD_COOLDOWN_MS";

/// Bound on pending preload candidates
pub const ENV_PRELOAD_MAX_PENDING: &str = "DASHCACHE_PRELOAD_MAX_PENDING";

/// Source call timeout in milliseconds; `0` or `none` disables it
pub const ENV_FETCH_TIMEOUT_MS: &str = "DASHCACHE_FETCH_TIMEOUT_MS";

/// Log level, one of [`LOG_LEVELS`]
pub const ENV_LOG_LEVEL: &str = "DASHCACHE_LOG_LEVEL";

/// Emit JSON log lines instead of human-readable ones
pub const ENV_JSON_LOGS: &str = "DASHCACHE_JSON_LOGS";
