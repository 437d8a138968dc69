//! Canonical cache keys for dashboard queries
//!
//! A key is `namespace:from|to|granularity|comparison|filters`. Filters are
//! written in name order, absent date bounds are written as
//! [`OPEN_BOUND_SENTINEL`], and enums use their stable names, so two queries
//! encode to the same key exactly when they ask for the same data.

use crate::error::{DashcacheError, Result};
use crate::models::{FilterValue, Query};
use dashcache_common::{format_date, DATASET_NAMESPACE, OPEN_BOUND_SENTINEL};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Canonical identity of a cached query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    /// Encode a query under the default dataset namespace
    #[must_use]
    pub fn encode(query: &Query) -> Self {
        Self::encode_in(DATASET_NAMESPACE, query)
    }

    /// Encode a query under an explicit namespace
    ///
    /// `namespace` should pass [`QueryKey::check_namespace`], otherwise the
    /// key cannot be matched back to it by [`QueryKey::is_in`].
    #[must_use]
    pub fn encode_in(namespace: &str, query: &Query) -> Self {
        let range = query.effective_range();
        let bound = |d: Option<chrono::NaiveDate>| {
            d.map_or_else(|| OPEN_BOUND_SENTINEL.to_string(), |d| format_date(&d))
        };

        let mut key = String::with_capacity(64);
        let _ = write!(
            key,
            "{namespace}:{}|{}|{}|{}|",
            bound(range.from),
            bound(range.to),
            query.granularity.as_str(),
            query.comparison.as_str(),
        );

        let mut filters: Vec<_> = query.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (i, (name, value)) in filters.into_iter().enumerate() {
            if i > 0 {
                key.push('&');
            }
            let _ = write!(key, "{name:?}=");
            write_value(&mut key, &value.normalized());
        }

        Self(key)
    }

    /// Check that `namespace` can prefix a key
    ///
    /// # Errors
    /// Returns `Configuration` for an empty namespace or one containing `:` or `|`
    pub fn check_namespace(namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(DashcacheError::configuration("Key namespace must not be empty"));
        }
        if namespace.contains([':', '|']) {
            return Err(DashcacheError::configuration(format!(
                "Key namespace '{namespace}' must not contain ':' or '|'"
            )));
        }
        Ok(())
    }

    /// Logical type of the key (the text before the first `:`)
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }

    /// Whether the key belongs to the given logical type
    #[must_use]
    pub fn is_in(&self, namespace: &str) -> bool {
        self.namespace() == namespace
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_value(out: &mut String, value: &FilterValue) {
    // Debug formatting quotes text and keeps `3` distinct from `3.0`
    let _ = match value {
        FilterValue::Bool(v) => write!(out, "{v}"),
        FilterValue::Integer(v) => write!(out, "{v}"),
        FilterValue::Float(v) => write!(out, "{v:?}"),
        FilterValue::Text(v) => write!(out, "{v:?}"),
    };
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for QueryKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl AsRef<str> for QueryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonMode, DateRange, Granularity};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let query = Query::new(Granularity::Day)
            .with_date_range(DateRange::between(date(2024, 1, 1), date(2024, 1, 31)))
            .with_filter("region", "emea")
            .with_filter("min_orders", 3);

        assert_eq!(
            QueryKey::encode(&query).as_str(),
            r#"dataset:2024-01-01|2024-01-31|day|none|"min_orders"=3&"region"="emea""#
        );
    }

    #[test]
    fn test_absent_bounds_use_sentinel() {
        let open = Query::new(Granularity::Week);
        let key = QueryKey::encode(&open);
        assert_eq!(key.as_str(), "dataset:*|*|week|none|");

        let half = Query::new(Granularity::Week).with_date_range(DateRange::since(date(2024, 5, 1)));
        assert_eq!(
            QueryKey::encode(&half).as_str(),
            "dataset:2024-05-01|*|week|none|"
        );
    }

    #[test]
    fn test_missing_range_equals_unbounded_range() {
        let without = Query::new(Granularity::Month);
        let with_empty = Query::new(Granularity::Month).with_date_range(DateRange::default());
        assert_eq!(QueryKey::encode(&without), QueryKey::encode(&with_empty));
    }

    #[test]
    fn test_filter_insertion_order_is_irrelevant() {
        let mut a = HashMap::new();
        a.insert("region".to_string(), FilterValue::from("emea"));
        a.insert("channel".to_string(), FilterValue::from("web"));
        a.insert("tier".to_string(), FilterValue::from(2));

        let mut b = HashMap::new();
        b.insert("tier".to_string(), FilterValue::from(2));
        b.insert("channel".to_string(), FilterValue::from("web"));
        b.insert("region".to_string(), FilterValue::from("emea"));

        let mut q1 = Query::new(Granularity::Day);
        q1.filters = a;
        let mut q2 = Query::new(Granularity::Day);
        q2.filters = b;

        assert_eq!(QueryKey::encode(&q1), QueryKey::encode(&q2));
    }

    #[test]
    fn test_distinct_queries_get_distinct_keys() {
        let base = Query::new(Granularity::Day).with_filter("tier", 3);
        let keys = [
            QueryKey::encode(&base),
            QueryKey::encode(&base.clone().with_granularity(Granularity::Week)),
            QueryKey::encode(&base.clone().with_comparison(ComparisonMode::PreviousPeriod)),
            QueryKey::encode(&Query::new(Granularity::Day).with_filter("tier", 3.0)),
            QueryKey::encode(&Query::new(Granularity::Day).with_filter("tier", "3")),
            QueryKey::encode(&Query::new(Granularity::Day)),
        ];

        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_separator_characters_are_escaped() {
        let tricky = Query::new(Granularity::Day).with_filter("a", "x\"&\"b\"=\"y");
        let split = Query::new(Granularity::Day)
            .with_filter("a", "x")
            .with_filter("b", "y");
        assert_ne!(QueryKey::encode(&tricky), QueryKey::encode(&split));
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let neg = Query::new(Granularity::Day).with_filter("delta", -0.0);
        let pos = Query::new(Granularity::Day).with_filter("delta", 0.0);
        assert_eq!(QueryKey::encode(&neg), QueryKey::encode(&pos));
    }

    #[test]
    fn test_namespace() {
        let query = Query::new(Granularity::Quarter);
        let key = QueryKey::encode_in("revenue", &query);

        assert_eq!(key.namespace(), "revenue");
        assert!(key.is_in("revenue"));
        assert!(!key.is_in("dataset"));
        assert_eq!(QueryKey::encode(&query).namespace(), "dataset");
        assert_eq!(QueryKey::from("plain").namespace(), "");
    }

    #[test]
    fn test_check_namespace() {
        assert!(QueryKey::check_namespace("revenue").is_ok());
        assert!(QueryKey::check_namespace("sales-emea").is_ok());
        for bad in ["", "sales:emea", "sales|emea"] {
            let err = QueryKey::check_namespace(bad).unwrap_err();
            assert!(matches!(err, DashcacheError::Configuration { .. }), "{bad}");
        }
    }
}
