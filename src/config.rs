//! Application configuration
//!
//! Values come from the environment (optionally via a `.env` file) and fall
//! back to the defaults of the notes list view.

use crate::cache::{QueryCacheConfig, RefetchFailurePolicy, NOTES_NAMESPACE};
use crate::debounce::DEFAULT_DEBOUNCE;
use crate::error::{NotesError, Result};
use crate::schema::DEFAULT_PER_PAGE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PER_PAGE: &str = "NOTES_PER_PAGE";
pub const ENV_DEBOUNCE_MS: &str = "NOTES_DEBOUNCE_MS";
pub const ENV_CACHE_GRACE_SECS: &str = "NOTES_CACHE_GRACE_SECS";
pub const ENV_REFETCH_FAILURE_POLICY: &str = "NOTES_REFETCH_FAILURE_POLICY";

/// Settings shared by the server prefetch and the client controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Notes per page
    pub per_page: u32,

    /// Quiet period before search input is committed
    pub debounce: Duration,

    /// Cache namespace of the notes list
    pub namespace: String,

    pub cache: QueryCacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            debounce: DEFAULT_DEBOUNCE,
            namespace: NOTES_NAMESPACE.to_string(),
            cache: QueryCacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(per_page) = parse_var::<u32>(&lookup, ENV_PER_PAGE)? {
            config.per_page = per_page;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_DEBOUNCE_MS)? {
            config.debounce = Duration::from_millis(ms);
        }

        let mut cache = QueryCacheConfig::builder();
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CACHE_GRACE_SECS)? {
            cache = cache.gc_grace(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup(ENV_REFETCH_FAILURE_POLICY) {
            let policy = RefetchFailurePolicy::from_str(&raw)
                .map_err(|e| NotesError::Config(format!("{}: {}", ENV_REFETCH_FAILURE_POLICY, e)))?;
            cache = cache.refetch_failure_policy(policy);
        }
        config.cache = cache.build();

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.per_page == 0 {
            return Err(NotesError::Config("per_page must be greater than 0".to_string()));
        }
        self.cache.validate().map_err(NotesError::Config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| NotesError::Config(format!("{} has invalid value: {}", key, raw))),
    }
}
