//! Dashcache Common - Shared constants and helpers for the dashcache workspace
//!
//! # Examples
//!
//! ```
//! use dashcache_common::{parse_bool, DATASET_NAMESPACE, DEFAULT_TTL_SECS};
//!
//! assert_eq!(DATASET_NAMESPACE, "dataset");
//! assert_eq!(DEFAULT_TTL_SECS, 300);
//! assert!(parse_bool("yes"));
//! ```

pub mod constants;
pub mod utils;

pub use constants::*;
pub use utils::*;
