//! Test doubles and sample queries for dashcache

use crate::models::{ChartKind, ComparisonMode, Dataset, DateRange, Granularity, Query, Series};
use crate::source::DatasetSource;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type FailurePredicate = Box<dyn Fn(&Query) -> bool + Send + Sync>;

/// Instrumented [`DatasetSource`] that records every call
///
/// Tracks the number of calls, the highest number of calls running at once,
/// and the queries seen. Latency and failures can be injected.
#[derive(Default)]
pub struct MockSource {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    history: Mutex<Vec<Query>>,
    delay: Option<Duration>,
    fail_when: Option<FailurePredicate>,
}

impl MockSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` (on the tokio clock) before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls whose query matches `predicate` fail
    #[must_use]
    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Query) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Every call fails
    #[must_use]
    pub fn always_failing(self) -> Self {
        self.failing_when(|_| true)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls made for exactly this query
    pub fn calls_for(&self, query: &Query) -> usize {
        self.history.lock().iter().filter(|q| *q == query).count()
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<Query> {
        self.history.lock().clone()
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DatasetSource for MockSource {
    async fn compute_dataset(&self, query: &Query) -> anyhow::Result<Dataset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push(query.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_when.as_ref().is_some_and(|fail| fail(query)) {
            anyhow::bail!("mock source failure for {} query", query.granularity);
        }
        Ok(mock_dataset(query))
    }
}

/// Deterministic dataset shaped by the query's granularity and comparison
#[must_use]
pub fn mock_dataset(query: &Query) -> Dataset {
    let buckets: u32 = match query.granularity {
        Granularity::Hour => 24,
        Granularity::Day => 31,
        Granularity::Week => 5,
        Granularity::Month | Granularity::Year => 12,
        Granularity::Quarter => 4,
    };
    let labels = (1..=buckets)
        .map(|i| format!("{}-{i}", query.granularity))
        .collect();
    let values: Vec<f64> = (1..=buckets).map(f64::from).collect();

    let mut dataset = Dataset::new(ChartKind::Line)
        .with_labels(labels)
        .with_series(Series::new("revenue", values.clone()));
    if query.comparison != ComparisonMode::None {
        dataset = dataset.with_comparison(Series::new(query.comparison.as_str(), values));
    }
    dataset
}

/// Daily revenue for January 2024 in one region
#[must_use]
pub fn sample_query() -> Query {
    let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
    let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap_or_default();
    Query::new(Granularity::Day)
        .with_date_range(DateRange::between(from, to))
        .with_filter("region", "emea")
}

/// `count` distinct queries that differ only in a numeric filter
#[must_use]
pub fn distinct_queries(count: usize) -> Vec<Query> {
    (0..count)
        .map(|i| {
            let store_id = i64::try_from(i).unwrap_or(i64::MAX);
            Query::new(Granularity::Month).with_filter("store_id", store_id)
        })
        .collect()
}
