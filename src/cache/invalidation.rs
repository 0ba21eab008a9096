//! Cache invalidation
//!
//! Invalidation is coarse: a note creation can change the contents and page
//! count of every list view, so writes invalidate the whole `notes` namespace
//! rather than computing which pages moved. Subscribed entries refetch in
//! the background; unsubscribed ones simply lose their data.

use crate::cache::fingerprint::{Fingerprint, NOTES_NAMESPACE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// A successful write in the namespace
    Mutation { operation: String },

    /// Manual invalidation
    Manual,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Mutation { operation } => write!(f, "mutation: {}", operation),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
        }
    }
}

/// Event emitted after a write: invalidate every entry of a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInvalidation {
    pub namespace: String,
}

impl NamespaceInvalidation {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Invalidation of every notes list query
    pub fn notes() -> Self {
        Self::new(NOTES_NAMESPACE)
    }

    /// Check if a fingerprint falls within the invalidated namespace
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        fingerprint.in_namespace(&self.namespace)
    }
}

impl std::fmt::Display for NamespaceInvalidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "namespace:{}", self.namespace)
    }
}

/// What a failed background refetch does to an entry that still has
/// `last_data` from an earlier success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefetchFailurePolicy {
    /// Move to `error`; `last_data` stays available as placeholder
    #[default]
    SurfaceError,

    /// Return to `success` with the last good data; the error is logged
    /// and the entry stays marked invalidated so the next subscription
    /// retries
    KeepLastGood,
}

impl std::str::FromStr for RefetchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "surface_error" | "error" => Ok(RefetchFailurePolicy::SurfaceError),
            "keep_last_good" | "keep" => Ok(RefetchFailurePolicy::KeepLastGood),
            other => Err(format!("unknown refetch failure policy: {}", other)),
        }
    }
}

/// Outcome of an invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Subscribed entries whose refetch started immediately
    pub refetched: Vec<Fingerprint>,

    /// Subscribed entries with a fetch already in flight; refetched once it lands
    pub deferred: Vec<Fingerprint>,

    /// Unsubscribed entries whose data was dropped
    pub dropped: Vec<Fingerprint>,
}

impl InvalidationReport {
    pub fn new(reason: InvalidationReason) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            refetched: Vec::new(),
            deferred: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// Total number of entries matched
    pub fn matched(&self) -> usize {
        self.refetched.len() + self.deferred.len() + self.dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reason_display() {
        assert_eq!(InvalidationReason::Manual.to_string(), "manual invalidation");

        let reason = InvalidationReason::Mutation {
            operation: "create_note".to_string(),
        };
        assert!(reason.to_string().contains("create_note"));
    }

    #[test]
    fn test_namespace_matches() {
        let event = NamespaceInvalidation::notes();
        assert!(event.matches(&Fingerprint::notes(None, 1)));
        assert!(event.matches(&Fingerprint::notes(Some("x"), 9)));
        assert!(!event.matches(&Fingerprint::builder("tags").build()));
        assert_eq!(event.to_string(), "namespace:notes");
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "keep_last_good".parse::<RefetchFailurePolicy>().unwrap(),
            RefetchFailurePolicy::KeepLastGood
        );
        assert_eq!(
            "SURFACE_ERROR".parse::<RefetchFailurePolicy>().unwrap(),
            RefetchFailurePolicy::SurfaceError
        );
        assert!("sometimes".parse::<RefetchFailurePolicy>().is_err());
    }

    #[test]
    fn test_report_matched() {
        let mut report = InvalidationReport::new(InvalidationReason::Manual);
        report.refetched.push(Fingerprint::notes(None, 1));
        report.dropped.push(Fingerprint::notes(None, 3));
        assert_eq!(report.matched(), 2);
    }
}
