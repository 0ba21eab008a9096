//! Notes backend capability
//!
//! The cache never talks to a transport directly: reads and writes go through
//! a [`NotesBackend`], and list responses are validated into a
//! [`QueryResult`] before they reach the cache.

pub mod memory;

pub use memory::InMemoryNotesBackend;

use crate::cache::{fetch_fn, FetchFn, QueryResult};
use crate::error::Result;
use crate::schema::{ListNotesQuery, ListNotesResponse, NoteDraft, NoteSummary};
use async_trait::async_trait;
use std::sync::Arc;

/// Remote source of truth for notes
#[async_trait]
pub trait NotesBackend: Send + Sync {
    /// Fetch one page of notes matching the search. Idempotent.
    async fn list_notes(&self, query: &ListNotesQuery) -> Result<ListNotesResponse>;

    /// Persist a new note
    async fn create_note(&self, draft: &NoteDraft) -> Result<NoteSummary>;
}

/// List a page and validate the response
pub async fn load_page(
    backend: &dyn NotesBackend,
    query: &ListNotesQuery,
) -> Result<QueryResult<NoteSummary>> {
    let response = backend.list_notes(query).await?;
    QueryResult::try_from(response)
}

/// Fetch function for one list query, for use with the query cache
pub fn list_fetch(backend: Arc<dyn NotesBackend>, query: ListNotesQuery) -> FetchFn<NoteSummary> {
    fetch_fn(move || {
        let backend = Arc::clone(&backend);
        let query = query.clone();
        async move { load_page(backend.as_ref(), &query).await }
    })
}
