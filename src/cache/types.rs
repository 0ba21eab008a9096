//! Core type definitions for the query cache

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated result of a list query, the only shape the cache stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    /// Items of the requested page, in backend order
    pub items: Vec<T>,

    /// Number of pages for the query, at least 1
    pub total_pages: u32,

    /// Number of matching items across all pages
    pub total_items: u64,
}

impl<T> QueryResult<T> {
    pub fn new(items: Vec<T>, total_pages: u32, total_items: u64) -> Self {
        Self {
            items,
            total_pages: total_pages.max(1),
            total_items,
        }
    }

    /// A single empty page
    pub fn empty() -> Self {
        Self::new(Vec::new(), 1, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Data status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// No usable data yet (first load, or dropped by invalidation)
    Pending,

    /// `data` holds the latest result
    Success,

    /// The last fetch failed
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Pending => write!(f, "pending"),
            QueryStatus::Success => write!(f, "success"),
            QueryStatus::Error => write!(f, "error"),
        }
    }
}

/// Whether a fetch is currently outstanding for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Fetching,
    Idle,
}

/// Statistics for cache behaviour monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Subscriptions served by an existing entry
    pub hits: u64,

    /// Subscriptions that created a new entry
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Fetch functions invoked (first loads and refetches)
    pub fetches: u64,

    /// Fetches started by invalidation or explicit refetch
    pub refetches: u64,

    /// Fetches that ended in error
    pub failures: u64,

    /// Entries matched by an invalidation
    pub invalidations: u64,

    /// Entries removed after their grace period
    pub evictions: u64,

    /// Completions dropped because their entry was gone
    pub discarded_results: u64,

    /// Entries seeded from a dehydrated snapshot
    pub hydrated: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, fetches: {}, invalidations: {}, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.fetches,
            self.invalidations,
            self.evictions
        )
    }
}
