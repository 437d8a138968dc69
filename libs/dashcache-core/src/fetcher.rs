//! Cache-through dataset fetching

use crate::cache_store::{CacheStats, CacheStore};
use crate::config::{CacheConfig, DashcacheConfig, PreloadConfig};
use crate::error::{DashcacheError, Result};
use crate::models::{Dataset, Query};
use crate::preload::PreloadScheduler;
use crate::query_key::QueryKey;
use crate::source::DatasetSource;
use dashcache_common::DATASET_NAMESPACE;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Store of computed datasets shared between fetchers
pub type DatasetStore = CacheStore<Arc<Dataset>>;

/// Where a loaded dataset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    Cached,
    Computed,
}

/// Cache lookup plus source call, shared by foreground fetches and the preload drain
///
/// Concurrent misses for the same key wait on one per-key lock, and the
/// waiters re-check the store before calling the source again.
pub(crate) struct Loader {
    store: Arc<DatasetStore>,
    source: Arc<dyn DatasetSource>,
    namespace: String,
    timeout: Option<Duration>,
    in_flight: DashMap<QueryKey, Arc<KeyLock>>,
}

/// Per-key lock plus the number of loads currently holding or waiting on it
#[derive(Default)]
struct KeyLock {
    mutex: tokio::sync::Mutex<()>,
    holders: AtomicUsize,
}

/// A load's claim on its key's lock, removed from the in-flight map by the last holder
///
/// Dropped after the mutex guard, so the store write is visible before the
/// entry goes away. Also runs when a caller's future is cancelled.
struct InFlightSlot<'a> {
    map: &'a DashMap<QueryKey, Arc<KeyLock>>,
    key: &'a QueryKey,
    lock: Arc<KeyLock>,
}

impl<'a> InFlightSlot<'a> {
    fn join(map: &'a DashMap<QueryKey, Arc<KeyLock>>, key: &'a QueryKey) -> Self {
        let entry = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyLock::default()));
        entry.holders.fetch_add(1, Ordering::AcqRel);
        let lock = Arc::clone(entry.value());
        drop(entry);
        Self { map, key, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // holders only change under the shard lock, so the count is exact here
        self.map.remove_if(self.key, |_, current| {
            Arc::ptr_eq(current, &self.lock)
                && self.lock.holders.fetch_sub(1, Ordering::AcqRel) == 1
        });
    }
}

impl Loader {
    pub(crate) fn key_for(&self, query: &Query) -> QueryKey {
        QueryKey::encode_in(&self.namespace, query)
    }

    pub(crate) fn is_cached(&self, key: &QueryKey) -> bool {
        self.store.contains(key)
    }

    pub(crate) async fn load(
        &self,
        query: &Query,
        key: &QueryKey,
    ) -> Result<(Arc<Dataset>, LoadOutcome)> {
        if let Some(dataset) = self.store.get(key) {
            debug!(key = %key, "Dataset cache hit");
            return Ok((dataset, LoadOutcome::Cached));
        }

        let slot = InFlightSlot::join(&self.in_flight, key);
        let _guard = slot.lock.mutex.lock().await;

        // another task may have filled the slot while we waited
        if let Some(entry) = self.store.entry(key) {
            debug!(key = %key, "Dataset computed by a concurrent fetch");
            return Ok((entry.value, LoadOutcome::Cached));
        }

        debug!(key = %key, "Dataset cache miss, computing");
        let dataset = Arc::new(self.compute(query).await?);
        self.store.set(key.clone(), Arc::clone(&dataset));
        Ok((dataset, LoadOutcome::Computed))
    }

    async fn compute(&self, query: &Query) -> Result<Dataset> {
        let call = self.source.compute_dataset(query);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => Ok(result?),
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "Dataset source timed out");
                    Err(DashcacheError::timeout(limit))
                }
            },
            None => Ok(call.await?),
        }
    }
}

/// Fetches dashboard datasets through a TTL cache and warms related queries
///
/// ```
/// use dashcache_core::{source_fn, ChartKind, Dataset, DatasetFetcher, Granularity, Query};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> dashcache_core::Result<()> {
/// let source = Arc::new(source_fn(|_query: Query| async move {
///     Ok::<_, anyhow::Error>(Dataset::new(ChartKind::Line))
/// }));
/// let fetcher = DatasetFetcher::builder(source).without_preload().build();
///
/// let query = Query::new(Granularity::Day);
/// fetcher.fetch(&query).await?;
/// fetcher.fetch(&query).await?;
/// assert_eq!(fetcher.stats().hits, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatasetFetcher {
    loader: Arc<Loader>,
    scheduler: PreloadScheduler,
}

impl DatasetFetcher {
    /// Create a fetcher from a full configuration
    #[must_use]
    pub fn new(source: Arc<dyn DatasetSource>, config: &DashcacheConfig) -> Self {
        Self::builder(source)
            .with_cache_config(config.cache.clone())
            .with_preload_config(config.preload.clone())
            .with_timeout(config.fetch.timeout)
            .build()
    }

    #[must_use]
    pub fn builder(source: Arc<dyn DatasetSource>) -> DatasetFetcherBuilder {
        DatasetFetcherBuilder::new(source)
    }

    /// Return the dataset for `query`, computing and caching it on a miss
    ///
    /// A hit returns without calling the source. Successful fetches hand the
    /// query to the preload scheduler; failures are neither cached nor preloaded.
    ///
    /// # Errors
    /// Returns `InvalidQuery` for malformed queries, and `FetchFailed` or
    /// `Timeout` when the source call fails
    #[instrument(skip(self, query), fields(namespace = %self.loader.namespace))]
    pub async fn fetch(&self, query: &Query) -> Result<Arc<Dataset>> {
        query.validate()?;
        let key = self.loader.key_for(query);

        let (dataset, outcome) = match self.loader.load(query, &key).await {
            Ok(loaded) => loaded,
            Err(e) => {
                debug!(key = %key, error = %e, "Dataset fetch failed");
                return Err(e);
            }
        };

        if outcome == LoadOutcome::Computed {
            debug!(key = %key, points = dataset.point_count(), "Dataset cached");
        }
        self.scheduler.on_fetched(query);
        Ok(dataset)
    }

    /// Cache statistics for the underlying store
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.loader.store.stats()
    }

    /// Drop every cached entry of the given query type
    pub fn invalidate(&self, query_type: &str) -> usize {
        let removed = self.loader.store.clear_namespace(query_type);
        debug!(query_type, removed, "Invalidated cached datasets");
        removed
    }

    /// Drop every cached entry
    pub fn invalidate_all(&self) {
        self.loader.store.clear_all();
        debug!("Invalidated all cached datasets");
    }

    /// Whether a live dataset for `query` is cached, without touching counters
    #[must_use]
    pub fn is_cached(&self, query: &Query) -> bool {
        self.loader.is_cached(&self.loader.key_for(query))
    }

    #[must_use]
    pub fn key_for(&self, query: &Query) -> QueryKey {
        self.loader.key_for(query)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.loader.namespace
    }

    #[must_use]
    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.loader.store
    }

    #[must_use]
    pub fn scheduler(&self) -> &PreloadScheduler {
        &self.scheduler
    }
}

/// Builder for [`DatasetFetcher`]
pub struct DatasetFetcherBuilder {
    source: Arc<dyn DatasetSource>,
    store: Option<Arc<DatasetStore>>,
    cache: CacheConfig,
    preload: PreloadConfig,
    namespace: String,
    timeout: Option<Duration>,
}

impl DatasetFetcherBuilder {
    fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            store: None,
            cache: CacheConfig::default(),
            preload: PreloadConfig::default(),
            namespace: DATASET_NAMESPACE.to_string(),
            timeout: crate::config::FetchConfig::default().timeout,
        }
    }

    /// Configuration for a store owned by this fetcher; ignored with [`Self::with_store`]
    #[must_use]
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Share an existing store, for example between fetchers of different namespaces
    #[must_use]
    pub fn with_store(mut self, store: Arc<DatasetStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_preload_config(mut self, preload: PreloadConfig) -> Self {
        self.preload = preload;
        self
    }

    #[must_use]
    pub fn without_preload(mut self) -> Self {
        self.preload = PreloadConfig::disabled();
        self
    }

    /// Prefix keys with `namespace`, the query type used by [`DatasetFetcher::invalidate`]
    ///
    /// # Errors
    /// Returns `Configuration` when the namespace is empty or contains a key separator
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        QueryKey::check_namespace(&namespace)?;
        self.namespace = namespace;
        Ok(self)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> DatasetFetcher {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(CacheStore::new(self.cache)));
        let loader = Arc::new(Loader {
            store,
            source: self.source,
            namespace: self.namespace,
            timeout: self.timeout,
            in_flight: DashMap::new(),
        });
        let scheduler = PreloadScheduler::new(Arc::clone(&loader), self.preload);
        DatasetFetcher { loader, scheduler }
    }
}
