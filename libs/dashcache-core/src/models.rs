//! Data models for dashboard queries and the datasets they produce

use crate::error::{DashcacheError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use dashcache_common::{parse_date, OPEN_BOUND_SENTINEL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Time-bucket size used to aggregate a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "year")]
    Year,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Granularity; 6] = [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
        Granularity::Year,
    ];

    /// Stable name used in cache keys and config files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    /// Granularities a user most often switches to from this one, most likely first
    #[must_use]
    pub fn adjacent(self) -> &'static [Granularity] {
        match self {
            Granularity::Hour => &[Granularity::Day],
            Granularity::Day => &[Granularity::Week, Granularity::Month],
            Granularity::Week => &[Granularity::Day, Granularity::Month],
            Granularity::Month => &[Granularity::Week, Granularity::Quarter],
            Granularity::Quarter => &[Granularity::Month, Granularity::Year],
            Granularity::Year => &[Granularity::Quarter],
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dataset is compared against another period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComparisonMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "previous_period")]
    PreviousPeriod,
    #[serde(rename = "year_over_year")]
    YearOverYear,
}

impl ComparisonMode {
    /// Stable name used in cache keys and config files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonMode::None => "none",
            ComparisonMode::PreviousPeriod => "previous_period",
            ComparisonMode::YearOverYear => "year_over_year",
        }
    }

    /// Next mode in the cyclic preference order
    #[must_use]
    pub fn next(self) -> ComparisonMode {
        match self {
            ComparisonMode::None => ComparisonMode::PreviousPeriod,
            ComparisonMode::PreviousPeriod => ComparisonMode::YearOverYear,
            ComparisonMode::YearOverYear => ComparisonMode::None,
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional-bounded date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    #[must_use]
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Closed window `[from, to]`
    #[must_use]
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self::new(Some(from), Some(to))
    }

    /// Window with no upper bound
    #[must_use]
    pub fn since(from: NaiveDate) -> Self {
        Self::new(Some(from), None)
    }

    /// Window with no lower bound
    #[must_use]
    pub fn until(to: NaiveDate) -> Self {
        Self::new(None, Some(to))
    }

    /// Parse `YYYY-MM-DD` bounds; empty strings and `*` leave a bound open
    ///
    /// # Errors
    /// Returns `DashcacheError::InvalidQuery` for a malformed date
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        fn bound(raw: &str) -> Result<Option<NaiveDate>> {
            let raw = raw.trim();
            if raw.is_empty() || raw == OPEN_BOUND_SENTINEL {
                return Ok(None);
            }
            parse_date(raw)
                .map(Some)
                .map_err(|e| DashcacheError::invalid_query(format!("invalid date '{raw}': {e}")))
        }
        Ok(Self::new(bound(from)?, bound(to)?))
    }

    /// True when neither bound is set
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Reject windows whose lower bound is after the upper bound
    ///
    /// # Errors
    /// Returns `DashcacheError::InvalidQuery` for an inverted window
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(DashcacheError::invalid_query(format!(
                    "date range starts after it ends: {from} > {to}"
                )));
            }
        }
        Ok(())
    }
}

/// Scalar filter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    /// Same value with float zero signs folded, so `-0.0` and `0.0` compare as one key
    #[must_use]
    pub fn normalized(&self) -> FilterValue {
        match self {
            FilterValue::Float(v) if *v == 0.0 => FilterValue::Float(0.0),
            other => other.clone(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

/// A dashboard dataset request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Time window; `None` means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Bucket size
    pub granularity: Granularity,
    /// Comparison mode
    #[serde(default)]
    pub comparison: ComparisonMode,
    /// Free-form scalar filters (region, channel, ...)
    #[serde(default)]
    pub filters: HashMap<String, FilterValue>,
}

impl Query {
    /// Unbounded, uncompared, unfiltered query at the given granularity
    #[must_use]
    pub fn new(granularity: Granularity) -> Self {
        Self {
            date_range: None,
            granularity,
            comparison: ComparisonMode::None,
            filters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_comparison(mut self, comparison: ComparisonMode) -> Self {
        self.comparison = comparison;
        self
    }

    #[must_use]
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Effective window, with an absent range read as unbounded
    #[must_use]
    pub fn effective_range(&self) -> DateRange {
        self.date_range.unwrap_or_default()
    }

    /// Check the query before it is encoded into a cache key
    ///
    /// # Errors
    /// Returns `DashcacheError::InvalidQuery` if the date range is inverted,
    /// a filter name is blank, or a float filter is not finite
    pub fn validate(&self) -> Result<()> {
        self.effective_range().validate()?;

        for (name, value) in &self.filters {
            if name.trim().is_empty() {
                return Err(DashcacheError::invalid_query("filter name cannot be empty"));
            }
            if let FilterValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(DashcacheError::invalid_query(format!(
                        "filter '{name}' has a non-finite value"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Chart shape a dataset is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartKind {
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "pie")]
    Pie,
    #[serde(rename = "area")]
    Area,
    #[serde(rename = "table")]
    Table,
}

/// One named column of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

impl Series {
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Derived analytics payload returned by the dataset source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Chart shape
    pub chart: ChartKind,
    /// Bucket labels, one per value in each series
    pub labels: Vec<String>,
    /// Primary series
    pub series: Vec<Series>,
    /// Series for the comparison period, empty when comparison is off
    #[serde(default)]
    pub comparison: Vec<Series>,
    /// When the source produced the payload
    pub generated_at: DateTime<Utc>,
}

impl Dataset {
    #[must_use]
    pub fn new(chart: ChartKind) -> Self {
        Self {
            chart,
            labels: Vec::new(),
            series: Vec::new(),
            comparison: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn with_series(mut self, series: Series) -> Self {
        self.series.push(series);
        self
    }

    #[must_use]
    pub fn with_comparison(mut self, series: Series) -> Self {
        self.comparison.push(series);
        self
    }

    /// Total number of values across primary and comparison series
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.series
            .iter()
            .chain(self.comparison.iter())
            .map(|s| s.values.len())
            .sum()
    }
}
