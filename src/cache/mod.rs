//! # Query Cache
//!
//! Fingerprint-keyed store of query results with subscriber tracking,
//! single-flight fetching, namespace invalidation and grace-period eviction.
//!
//! ## Features
//!
//! - **Deterministic keys**: [`Fingerprint`] is shared by server prefetch and client views
//! - **Single flight**: concurrent subscribers of one fingerprint share one fetch
//! - **Placeholder data**: refetching entries keep their last successful result
//! - **Coarse invalidation**: a write invalidates its whole namespace
//! - **Grace-period eviction**: unsubscribed entries survive brief unmount/remount
//!
//! ## Example
//!
//! ```no_run
//! use notes_sync::cache::{fetch_fn, Fingerprint, QueryCache, QueryCacheConfig, QueryResult};
//!
//! # async fn example() -> notes_sync::Result<()> {
//! let cache: QueryCache<String> = QueryCache::new(QueryCacheConfig::default());
//!
//! let fetch = fetch_fn(|| async { Ok(QueryResult::new(vec!["hello".to_string()], 1, 1)) });
//! let fingerprint = Fingerprint::notes(None, 1);
//! let mut subscription = cache.get_or_fetch(fingerprint.clone(), fetch).await;
//!
//! let entry = subscription.settled().await;
//! println!("{} -> {:?}", fingerprint, entry.data);
//!
//! cache.release(&fingerprint).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod fingerprint;
pub mod invalidation;
pub mod store;
pub mod types;

pub use config::{QueryCacheConfig, QueryCacheConfigBuilder};
pub use entry::{CacheEntry, EntryMetadata};
pub use fingerprint::{
    coerce_page, normalize_page, normalize_search, Fingerprint, FingerprintBuilder, KeyPart,
    NOTES_NAMESPACE,
};
pub use invalidation::{
    InvalidationReason, InvalidationReport, NamespaceInvalidation, RefetchFailurePolicy,
};
pub use store::{fetch_fn, FetchFn, FetchFuture, QueryCache, Subscription};
pub use types::{CacheStats, FetchStatus, QueryResult, QueryStatus};
