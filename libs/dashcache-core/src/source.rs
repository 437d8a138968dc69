//! The collaborator that actually computes datasets

use crate::models::{Dataset, Query};
use std::future::Future;

/// Backend that turns a query into a dataset
///
/// Calls may take a long time and may fail with transient errors. The fetcher
/// never retries; errors surface to the foreground caller as
/// [`DashcacheError::FetchFailed`](crate::error::DashcacheError::FetchFailed).
#[async_trait::async_trait]
pub trait DatasetSource: Send + Sync {
    /// Compute the dataset for a query
    async fn compute_dataset(&self, query: &Query) -> anyhow::Result<Dataset>;
}

/// Adapter that lets an async closure act as a [`DatasetSource`]
pub struct FnSource<F> {
    compute: F,
}

impl<F> FnSource<F> {
    pub fn new(compute: F) -> Self {
        Self { compute }
    }
}

#[async_trait::async_trait]
impl<F, Fut> DatasetSource for FnSource<F>
where
    F: Fn(Query) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Dataset>> + Send,
{
    async fn compute_dataset(&self, query: &Query) -> anyhow::Result<Dataset> {
        (self.compute)(query.clone()).await
    }
}

/// Wrap an async closure as a dataset source
///
/// ```
/// use dashcache_core::{source_fn, ChartKind, Dataset, DatasetSource, Granularity, Query};
///
/// # #[tokio::main]
/// # async fn main() {
/// let source = source_fn(|query: Query| async move {
///     Ok::<_, anyhow::Error>(Dataset::new(ChartKind::Line).with_labels(vec![query.granularity.to_string()]))
/// });
/// let dataset = source
///     .compute_dataset(&Query::new(Granularity::Day))
///     .await
///     .unwrap();
/// assert_eq!(dataset.labels, vec!["day".to_string()]);
/// # }
/// ```
pub fn source_fn<F, Fut>(compute: F) -> FnSource<F>
where
    F: Fn(Query) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Dataset>> + Send,
{
    FnSource::new(compute)
}
