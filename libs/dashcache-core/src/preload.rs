//! Speculative preloading of related dashboard queries
//!
//! After a successful fetch the scheduler queues the queries a user is likely
//! to ask for next (neighbouring granularities and the next comparison mode)
//! and warms the cache with them one at a time. A single drain task runs at a
//! time; it waits the configured cooldown before each preload so foreground
//! traffic goes first. Preload failures are logged and dropped.

use crate::config::PreloadConfig;
use crate::fetcher::{LoadOutcome, Loader};
use crate::models::Query;
use crate::query_key::QueryKey;
use dashcache_common::truncate_string;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Whether a drain task is currently running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadState {
    #[default]
    Idle,
    Draining,
}

/// Preload scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadStats {
    /// Candidates accepted into the queue
    pub queued: u64,
    /// Preloads that stored a dataset
    pub completed: u64,
    /// Preloads whose source call failed
    pub failed: u64,
    /// Candidates skipped because they were cached or already queued
    pub skipped: u64,
    /// Candidates dropped because the queue was full
    pub dropped: u64,
    /// Candidates currently waiting
    pub pending: usize,
    pub state: PreloadState,
}

struct Queue {
    state: PreloadState,
    pending: VecDeque<(QueryKey, Query)>,
    pending_keys: HashSet<QueryKey>,
    stats: PreloadStats,
}

struct Shared {
    loader: Arc<Loader>,
    config: PreloadConfig,
    queue: Mutex<Queue>,
    state_tx: watch::Sender<PreloadState>,
}

impl Shared {
    // callers hold the queue lock so state and queue change together
    fn set_state(&self, queue: &mut Queue, state: PreloadState) {
        queue.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Resets the state if a drain task unwinds mid-loop
struct DrainGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut queue = self.shared.queue.lock();
        self.shared.set_state(&mut queue, PreloadState::Idle);
    }
}

/// Single-flight background cache warmer
#[derive(Clone)]
pub struct PreloadScheduler {
    shared: Arc<Shared>,
}

impl PreloadScheduler {
    pub(crate) fn new(loader: Arc<Loader>, config: PreloadConfig) -> Self {
        let (state_tx, _) = watch::channel(PreloadState::Idle);
        Self {
            shared: Arc::new(Shared {
                loader,
                config,
                queue: Mutex::new(Queue {
                    state: PreloadState::Idle,
                    pending: VecDeque::new(),
                    pending_keys: HashSet::new(),
                    stats: PreloadStats::default(),
                }),
                state_tx,
            }),
        }
    }

    /// Related queries worth warming after `query`
    ///
    /// Adjacent granularities come first (same comparison mode), followed by
    /// the next comparison mode at the same granularity. Date range and
    /// filters are carried over unchanged.
    #[must_use]
    pub fn candidates(query: &Query) -> Vec<Query> {
        let mut candidates: Vec<Query> = query
            .granularity
            .adjacent()
            .iter()
            .map(|granularity| query.clone().with_granularity(*granularity))
            .collect();
        candidates.push(query.clone().with_comparison(query.comparison.next()));
        candidates
    }

    /// Queue the candidates of a successfully fetched query
    ///
    /// Never blocks. Starts a drain task on the current tokio runtime when the
    /// scheduler is idle.
    pub fn on_fetched(&self, query: &Query) {
        if !self.shared.config.enabled {
            return;
        }

        let shared = &self.shared;
        let mut queue = shared.queue.lock();
        for candidate in Self::candidates(query) {
            let key = shared.loader.key_for(&candidate);
            if shared.loader.is_cached(&key) || queue.pending_keys.contains(&key) {
                queue.stats.skipped += 1;
                continue;
            }
            if queue.pending.len() >= shared.config.max_pending {
                queue.stats.dropped += 1;
                debug!(key = %key, "Preload queue full, dropping candidate");
                continue;
            }
            debug!(key = %key, "Queued preload candidate");
            queue.pending_keys.insert(key.clone());
            queue.pending.push_back((key, candidate));
            queue.stats.queued += 1;
        }

        if queue.state == PreloadState::Draining || queue.pending.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                shared.set_state(&mut queue, PreloadState::Draining);
                drop(queue);
                handle.spawn(drain(Arc::clone(shared)));
            }
            Err(_) => {
                warn!("No tokio runtime available, discarding preload candidates");
                queue.stats.dropped += queue.pending.len() as u64;
                queue.pending.clear();
                queue.pending_keys.clear();
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> PreloadState {
        self.shared.queue.lock().state
    }

    /// Number of candidates waiting to be preloaded
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.config.enabled
    }

    #[must_use]
    pub fn stats(&self) -> PreloadStats {
        let queue = self.shared.queue.lock();
        PreloadStats {
            pending: queue.pending.len(),
            state: queue.state,
            ..queue.stats.clone()
        }
    }

    /// Wait until the queue has drained and no preload is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        // the sender lives in `shared`, so this cannot observe a closed channel
        let _ = rx.wait_for(|state| *state == PreloadState::Idle).await;
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = DrainGuard {
        shared: Arc::clone(&shared),
        armed: true,
    };
    debug!("Preload drain started");

    loop {
        let next = {
            let mut queue = shared.queue.lock();
            match queue.pending.pop_front() {
                Some((key, query)) => {
                    queue.pending_keys.remove(&key);
                    Some((key, query))
                }
                None => {
                    shared.set_state(&mut queue, PreloadState::Idle);
                    None
                }
            }
        };
        let Some((key, query)) = next else {
            // Idle is already published; a newer drain may own the state now
            guard.armed = false;
            break;
        };

        tokio::time::sleep(shared.config.cooldown).await;

        // a foreground fetch may have stored it during the cooldown
        if shared.loader.is_cached(&key) {
            shared.queue.lock().stats.skipped += 1;
            continue;
        }

        // straight to the loader: a preloaded query does not queue its own neighbours
        match shared.loader.load(&query, &key).await {
            Ok((_, outcome)) => {
                if outcome == LoadOutcome::Computed {
                    debug!(key = %key, "Preloaded dataset");
                }
                shared.queue.lock().stats.completed += 1;
                #[cfg(feature = "observability")]
                metrics::counter!(crate::observability::metric_names::PRELOAD_COMPLETED).increment(1);
            }
            Err(e) => {
                warn!(key = %truncate_string(key.as_str(), 120), error = %e, "Preload failed");
                shared.queue.lock().stats.failed += 1;
                #[cfg(feature = "observability")]
                metrics::counter!(crate::observability::metric_names::PRELOAD_FAILED).increment(1);
            }
        }
    }

    debug!("Preload drain finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::DatasetFetcher;
    use crate::models::{ComparisonMode, Granularity};
    use crate::source::DatasetSource;
    use crate::test_utils::{mock_dataset, sample_query, MockSource};
    use std::time::Duration;

    const COOLDOWN: Duration = Duration::from_millis(500);

    fn preloading_fetcher(source: &Arc<MockSource>, max_pending: usize) -> DatasetFetcher {
        DatasetFetcher::builder(Arc::clone(source) as Arc<dyn DatasetSource>)
            .with_preload_config(
                PreloadConfig::default()
                    .with_cooldown(COOLDOWN)
                    .with_max_pending(max_pending),
            )
            .build()
    }

    fn granularities(candidates: &[Query]) -> Vec<Granularity> {
        candidates.iter().map(|q| q.granularity).collect()
    }

    #[test]
    fn test_day_candidates() {
        let query = Query::new(Granularity::Day).with_filter("region", "emea");
        let candidates = PreloadScheduler::candidates(&query);

        assert_eq!(
            granularities(&candidates),
            vec![Granularity::Week, Granularity::Month, Granularity::Day]
        );
        assert_eq!(candidates[0].comparison, ComparisonMode::None);
        assert_eq!(candidates[2].comparison, ComparisonMode::PreviousPeriod);
        assert!(candidates.iter().all(|c| c.filters == query.filters));
    }

    #[test]
    fn test_edge_granularities_have_one_neighbour() {
        let hour = PreloadScheduler::candidates(&Query::new(Granularity::Hour));
        assert_eq!(
            granularities(&hour),
            vec![Granularity::Day, Granularity::Hour]
        );

        let year = PreloadScheduler::candidates(
            &Query::new(Granularity::Year).with_comparison(ComparisonMode::YearOverYear),
        );
        assert_eq!(
            granularities(&year),
            vec![Granularity::Quarter, Granularity::Year]
        );
        assert_eq!(year[1].comparison, ComparisonMode::None);
    }

    #[test]
    fn test_candidates_never_repeat_the_query() {
        for granularity in Granularity::ALL {
            let query = Query::new(granularity);
            assert!(PreloadScheduler::candidates(&query)
                .iter()
                .all(|c| c != &query));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_warms_neighbours_after_cooldown() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 32);
        let query = sample_query();
        let week = query.clone().with_granularity(Granularity::Week);
        let month = query.clone().with_granularity(Granularity::Month);

        fetcher.fetch(&query).await.unwrap();
        assert_eq!(fetcher.scheduler().state(), PreloadState::Draining);
        assert!(!fetcher.is_cached(&week));

        tokio::time::sleep(COOLDOWN + Duration::from_millis(100)).await;
        assert!(fetcher.is_cached(&week));

        fetcher.scheduler().wait_idle().await;
        assert!(fetcher.is_cached(&month));
        assert!(fetcher.is_cached(&query.clone().with_comparison(ComparisonMode::PreviousPeriod)));
        assert_eq!(source.calls_for(&week), 1);
        assert_eq!(fetcher.scheduler().state(), PreloadState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preloads_do_not_cascade() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 32);

        fetcher.fetch(&sample_query()).await.unwrap();
        fetcher.scheduler().wait_idle().await;

        // the query itself plus its three candidates, none of theirs
        assert_eq!(source.call_count(), 4);
        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_triggers_stay_single_flight() {
        let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(200)));
        let fetcher = DatasetFetcher::builder(Arc::clone(&source) as Arc<dyn DatasetSource>)
            .with_preload_config(
                PreloadConfig::default().with_cooldown(Duration::from_millis(10)),
            )
            .build();
        let scheduler = fetcher.scheduler();

        let day = sample_query();
        scheduler.on_fetched(&day);
        scheduler.on_fetched(&day.clone().with_granularity(Granularity::Week));
        scheduler.on_fetched(&day.clone().with_granularity(Granularity::Month));

        // week, month, day/previous_period, day, week/previous_period, quarter,
        // month/previous_period
        let stats = scheduler.stats();
        assert_eq!(stats.queued, 7);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.state, PreloadState::Draining);

        scheduler.wait_idle().await;
        assert_eq!(source.call_count(), 7);
        assert_eq!(source.max_concurrency(), 1);
        assert_eq!(scheduler.stats().completed, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_fetch_runs_beside_a_preload() {
        let latency = Duration::from_secs(1);
        let source = Arc::new(MockSource::new().with_delay(latency));
        let fetcher = preloading_fetcher(&source, 32);

        fetcher.fetch(&sample_query()).await.unwrap();
        // past the cooldown: the first preload is now waiting on the source
        tokio::time::sleep(COOLDOWN + Duration::from_millis(100)).await;
        assert_eq!(fetcher.scheduler().state(), PreloadState::Draining);
        assert_eq!(source.call_count(), 2);

        let unrelated = Query::new(Granularity::Hour).with_filter("region", "apac");
        let started = tokio::time::Instant::now();
        fetcher.fetch(&unrelated).await.unwrap();

        // behind the preload it would take until that call finished, 0.9s later
        let elapsed = started.elapsed();
        assert!(elapsed >= latency && elapsed < latency + Duration::from_millis(50));
        assert_eq!(source.max_concurrency(), 2);
        fetcher.scheduler().wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_draining_appends_to_queue() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 32);
        let scheduler = fetcher.scheduler();

        scheduler.on_fetched(&sample_query());
        tokio::time::sleep(COOLDOWN + Duration::from_millis(10)).await;
        assert_eq!(scheduler.state(), PreloadState::Draining);

        let quarter = sample_query().with_granularity(Granularity::Quarter);
        scheduler.on_fetched(&quarter);
        scheduler.wait_idle().await;

        assert!(fetcher.is_cached(&quarter.clone().with_granularity(Granularity::Year)));
        assert_eq!(source.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_queue_bound_drops_extra_candidates() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 2);

        fetcher.scheduler().on_fetched(&sample_query());
        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn test_cached_candidates_are_skipped() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 32);
        let week = sample_query().with_granularity(Granularity::Week);
        fetcher
            .store()
            .set(fetcher.key_for(&week), Arc::new(mock_dataset(&week)));

        fetcher.scheduler().on_fetched(&sample_query());
        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_queues_nothing() {
        let source = Arc::new(MockSource::new().always_failing());
        let fetcher = preloading_fetcher(&source, 32);

        assert!(fetcher.fetch(&sample_query()).await.is_err());
        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.state, PreloadState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_failures_are_swallowed() {
        let source =
            Arc::new(MockSource::new().failing_when(|q| q.granularity == Granularity::Week));
        let fetcher = preloading_fetcher(&source, 32);

        fetcher.fetch(&sample_query()).await.unwrap();
        fetcher.scheduler().wait_idle().await;

        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 2);
        assert!(!fetcher.is_cached(&sample_query().with_granularity(Granularity::Week)));
    }

    #[tokio::test]
    async fn test_disabled_scheduler_ignores_fetches() {
        let source = Arc::new(MockSource::new());
        let fetcher = DatasetFetcher::builder(Arc::clone(&source) as Arc<dyn DatasetSource>)
            .without_preload()
            .build();

        fetcher.fetch(&sample_query()).await.unwrap();
        assert!(!fetcher.scheduler().is_enabled());
        assert_eq!(fetcher.scheduler().stats(), PreloadStats::default());
        assert_eq!(source.call_count(), 1);
    }

    #[test]
    fn test_without_runtime_candidates_are_discarded() {
        let source = Arc::new(MockSource::new());
        let fetcher = preloading_fetcher(&source, 32);

        fetcher.scheduler().on_fetched(&sample_query());
        let stats = fetcher.scheduler().stats();
        assert_eq!(stats.state, PreloadState::Idle);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dropped, 3);
    }
}
