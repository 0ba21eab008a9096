//! Configuration for the query cache

use crate::cache::invalidation::RefetchFailurePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the query cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    /// How long an entry with no subscribers is kept before eviction.
    /// Covers rapid unmount/remount, e.g. paging back and forth.
    pub gc_grace: Duration,

    /// What a failed background refetch does to an entry that had data
    pub refetch_failure_policy: RefetchFailurePolicy,

    /// Enable statistics collection
    pub enable_metrics: bool,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            // 5 minutes
            gc_grace: Duration::from_secs(300),
            refetch_failure_policy: RefetchFailurePolicy::SurfaceError,
            enable_metrics: true,
        }
    }
}

impl QueryCacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> QueryCacheConfigBuilder {
        QueryCacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.gc_grace.is_zero() {
            return Err("gc_grace must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Short grace period for frequently changing views
    pub fn realtime() -> Self {
        Self {
            gc_grace: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Grace period short enough for tests driving a paused clock
    pub fn testing() -> Self {
        Self {
            gc_grace: Duration::from_secs(1),
            ..Default::default()
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct QueryCacheConfigBuilder {
    gc_grace: Option<Duration>,
    refetch_failure_policy: Option<RefetchFailurePolicy>,
    enable_metrics: Option<bool>,
}

impl QueryCacheConfigBuilder {
    /// Set the eviction grace period
    pub fn gc_grace(mut self, grace: Duration) -> Self {
        self.gc_grace = Some(grace);
        self
    }

    /// Set the policy for failed background refetches
    pub fn refetch_failure_policy(mut self, policy: RefetchFailurePolicy) -> Self {
        self.refetch_failure_policy = Some(policy);
        self
    }

    /// Enable or disable statistics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> QueryCacheConfig {
        let defaults = QueryCacheConfig::default();

        QueryCacheConfig {
            gc_grace: self.gc_grace.unwrap_or(defaults.gc_grace),
            refetch_failure_policy: self
                .refetch_failure_policy
                .unwrap_or(defaults.refetch_failure_policy),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}
