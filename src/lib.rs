//! # notes-sync
//!
//! Query-state synchronization for a paginated, searchable notes list.
//!
//! ## Features
//!
//! - Fingerprint-keyed query cache with single-flight fetching
//! - Placeholder data while a page or search change is loading
//! - Debounced search input
//! - Server prefetch and client hydration without a second fetch
//! - Note creation with namespace-wide invalidation
//!
//! ## Rendering a list
//!
//! ```no_run
//! use notes_sync::{
//!     AppConfig, InMemoryNotesBackend, NotesController, QueryCache, TracingNotifier,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let cache = QueryCache::new(config.cache.clone());
//!     let backend = Arc::new(InMemoryNotesBackend::seeded(50));
//!
//!     let mut list =
//!         NotesController::mount(cache, backend, Arc::new(TracingNotifier), config, 1, "").await;
//!
//!     list.input_search("groceries");
//!     list.wait_for_search_commit().await;
//!
//!     let view = list.settle().await;
//!     println!("page {} of {}: {} notes", view.page, view.total_pages, view.items.len());
//!
//!     list.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Server prefetch
//!
//! ```no_run
//! use notes_sync::{prefetch_notes, AppConfig, InMemoryNotesBackend, RequestParams};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::default();
//!     let backend = Arc::new(InMemoryNotesBackend::seeded(50));
//!
//!     let params = RequestParams::from_query("page=2&search=work");
//!     let bootstrap = prefetch_notes(backend, &params, &config).await;
//!
//!     // Ship to the client, which passes it to `NotesController::bootstrap`
//!     println!("{}", bootstrap.state.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod error;
pub mod hydration;
pub mod mutation;
pub mod notify;
pub mod schema;

// Re-export main types for convenience
pub use backend::{InMemoryNotesBackend, NotesBackend};
pub use cache::{
    CacheEntry, CacheStats, Fingerprint, FingerprintBuilder, InvalidationReason,
    NamespaceInvalidation, QueryCache, QueryCacheConfig, QueryResult, QueryStatus,
    RefetchFailurePolicy, Subscription,
};
pub use config::AppConfig;
pub use controller::{NotesController, NotesView};
pub use debounce::Debouncer;
pub use error::{ErrorKind, NotesError, Result};
pub use hydration::{prefetch_notes, ClientBootstrap, DehydratedState, RequestParams};
pub use mutation::{MutationCoordinator, NoteForm};
pub use notify::{ChannelNotifier, Notification, Notifier, TracingNotifier};
pub use schema::{ListNotesQuery, ListNotesResponse, NoteDraft, NoteSummary, NoteTag};
