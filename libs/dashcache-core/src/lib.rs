//! Dashcache Core - Query result cache and speculative preloading for dashboards
//!
//! Dashboards ask for the same analytics datasets over and over, and users
//! tend to move between neighbouring views (day to week, no comparison to
//! previous period). This crate keeps computed datasets in a bounded TTL cache
//! keyed by a canonical encoding of the query, and warms the cache in the
//! background with the views a user is likely to open next.
//!
//! # Features
//!
//! - **Canonical Keys**: Queries that ask for the same data share one cache entry
//! - **Bounded TTL Cache**: Lazy expiry and FIFO eviction by write time
//! - **Cache-Through Fetching**: Concurrent misses for one query share a source call
//! - **Speculative Preload**: Single-flight background warming with a cooldown
//! - **Configuration**: Defaults, JSON/YAML files and `DASHCACHE_*` environment variables
//! - **Observability**: `tracing` everywhere, optional `metrics` counters
//!
//! # Quick Start
//!
//! ```no_run
//! use dashcache_core::{
//!     source_fn, ChartKind, ConfigLoader, Dataset, DatasetFetcher, Granularity, Query,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> dashcache_core::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! let source = Arc::new(source_fn(|_query: Query| async move {
//!     // run the warehouse query here
//!     Ok::<_, anyhow::Error>(Dataset::new(ChartKind::Bar))
//! }));
//! let fetcher = DatasetFetcher::new(source, &config);
//!
//! let dataset = fetcher.fetch(&Query::new(Granularity::Day)).await?;
//! println!("{} points, cache: {:?}", dataset.point_count(), fetcher.stats());
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Features
//!
//! - `test-utils`: Enable test utilities (for testing only)
//! - `observability`: Record cache and preload counters through `metrics`

pub mod cache_store;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod observability;
pub mod preload;
pub mod query_key;
pub mod source;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache_store::{CacheEntry, CacheStats, CacheStore};
pub use config::{CacheConfig, DashcacheConfig, FetchConfig, LoggingConfig, PreloadConfig};
pub use config_loader::{load_config, load_config_with_paths, ConfigLoader};
pub use error::{DashcacheError, Result};
pub use fetcher::{DatasetFetcher, DatasetFetcherBuilder, DatasetStore};
pub use models::{
    ChartKind, ComparisonMode, Dataset, DateRange, FilterValue, Granularity, Query, Series,
};
pub use observability::init_tracing;
pub use preload::{PreloadScheduler, PreloadState, PreloadStats};
pub use query_key::QueryKey;
pub use source::{source_fn, DatasetSource, FnSource};
