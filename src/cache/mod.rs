//! Cache module for storing API responses to disk
//!
//! This module provides a TTL cache store that persists API responses to the
//! filesystem. An entry is only served while the current time is before its
//! expiry; stale entries read as misses until they are overwritten or cleared.

mod store;

pub use store::{CacheError, CacheStore};
