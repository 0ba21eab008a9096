//! Cache entry state machine
//!
//! Transitions are methods on [`CacheEntry`] so the store can never leave an
//! entry with `data` outside `success` or `error` outside `error`.

use crate::cache::fingerprint::Fingerprint;
use crate::cache::invalidation::RefetchFailurePolicy;
use crate::cache::types::{FetchStatus, QueryResult, QueryStatus};
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached query and its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cache key
    pub fingerprint: Fingerprint,

    /// Data status
    pub status: QueryStatus,

    /// Whether a fetch is outstanding
    pub fetch_status: FetchStatus,

    /// Current result, present only when `status` is `Success`
    pub data: Option<QueryResult<T>>,

    /// Most recent successful result, kept across refetches as placeholder
    pub last_data: Option<QueryResult<T>>,

    /// Failure of the last fetch, present only when `status` is `Error`
    pub error: Option<ErrorKind>,

    /// Number of active views referencing this fingerprint
    pub subscriber_count: usize,

    /// Set by invalidation, cleared by the next successful fetch
    pub invalidated: bool,

    /// Entry metadata
    pub metadata: EntryMetadata,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When data was last written
    pub updated_at: Option<DateTime<Utc>>,

    /// Incremented on every successful result
    pub data_version: u64,

    /// Number of fetches started for this entry
    pub fetch_count: u64,

    /// Number of failed fetches
    pub error_count: u64,
}

impl EntryMetadata {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: None,
            data_version: 0,
            fetch_count: 0,
            error_count: 0,
        }
    }
}

impl<T: Clone> CacheEntry<T> {
    /// A new entry with no data and no fetch started
    pub fn pending(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            last_data: None,
            error: None,
            subscriber_count: 0,
            invalidated: false,
            metadata: EntryMetadata::new(),
        }
    }

    /// A successful entry seeded without a fetch (hydration)
    pub fn with_data(fingerprint: Fingerprint, data: QueryResult<T>) -> Self {
        let mut entry = Self::pending(fingerprint);
        entry.resolve(data);
        entry
    }

    /// Mark a fetch as started
    ///
    /// A refetch of a successful entry moves it back to `pending`; the
    /// previous result remains in `last_data`.
    pub fn begin_fetch(&mut self) {
        self.fetch_status = FetchStatus::Fetching;
        self.status = QueryStatus::Pending;
        self.data = None;
        self.error = None;
        self.metadata.fetch_count += 1;
    }

    /// Apply a successful fetch
    pub fn resolve(&mut self, result: QueryResult<T>) {
        self.status = QueryStatus::Success;
        self.fetch_status = FetchStatus::Idle;
        self.last_data = Some(result.clone());
        self.data = Some(result);
        self.error = None;
        self.invalidated = false;
        self.metadata.data_version += 1;
        self.metadata.updated_at = Some(Utc::now());
    }

    /// Apply a failed fetch
    pub fn reject(&mut self, error: ErrorKind, policy: RefetchFailurePolicy) {
        self.fetch_status = FetchStatus::Idle;
        self.metadata.error_count += 1;

        match (policy, self.last_data.clone()) {
            (RefetchFailurePolicy::KeepLastGood, Some(last)) if self.invalidated => {
                self.status = QueryStatus::Success;
                self.data = Some(last);
                self.error = None;
            }
            _ => {
                self.status = QueryStatus::Error;
                self.data = None;
                self.error = Some(error);
            }
        }
    }

    /// Forget the current result so the next subscription fetches again
    pub fn drop_data(&mut self) {
        self.invalidated = true;
        if self.fetch_status == FetchStatus::Idle {
            self.status = QueryStatus::Pending;
            self.data = None;
            self.error = None;
        }
    }

    /// Data to show: the current result, else the placeholder
    pub fn visible_data(&self) -> Option<&QueryResult<T>> {
        self.data.as_ref().or(self.last_data.as_ref())
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Showing `last_data` while the current result is not available
    pub fn is_placeholder(&self) -> bool {
        self.data.is_none() && self.last_data.is_some()
    }

    /// Whether a new subscription should start a fetch
    pub fn needs_fetch(&self) -> bool {
        !self.is_fetching() && (self.status != QueryStatus::Success || self.invalidated)
    }

    /// Check the status/data/error invariants
    pub fn is_consistent(&self) -> bool {
        let data_ok = self.data.is_some() == (self.status == QueryStatus::Success);
        let error_ok = self.error.is_some() == (self.status == QueryStatus::Error);
        data_ok && error_ok
    }
}
