//! In-memory notes backend
//!
//! Newest notes are listed first. Every call is recorded so tests can assert
//! exactly which queries reached the backend, and failures can be injected
//! for both reads and writes.

use crate::backend::NotesBackend;
use crate::error::{NotesError, Result};
use crate::schema::{ListNotesQuery, ListNotesResponse, NoteDraft, NoteSummary, NoteTag};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct MemoryState {
    /// Newest first
    notes: Vec<NoteSummary>,
    list_calls: Vec<ListNotesQuery>,
    create_calls: usize,
    failing_lists: usize,
    fail_creates: bool,
}

/// Notes backend holding everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryNotesBackend {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl InMemoryNotesBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend holding `notes`, newest first
    pub fn with_notes(notes: Vec<NoteSummary>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                notes,
                ..Default::default()
            }),
            latency: None,
        }
    }

    /// Backend holding `count` generated notes titled "Note 1" (oldest) to
    /// "Note {count}" (newest)
    pub fn seeded(count: usize) -> Self {
        let now = Utc::now();
        let notes = (1..=count)
            .rev()
            .map(|n| {
                let created = now - ChronoDuration::minutes((count - n) as i64);
                NoteSummary {
                    id: format!("note-{}", n),
                    title: format!("Note {}", n),
                    content: format!("Generated content for note {}", n),
                    tag: NoteTag::ALL[(n - 1) % NoteTag::ALL.len()],
                    created_at: created,
                    updated_at: created,
                }
            })
            .collect();

        Self::with_notes(notes)
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every list query received, in order
    pub async fn list_calls(&self) -> Vec<ListNotesQuery> {
        self.state.lock().await.list_calls.clone()
    }

    /// Number of times `query` was listed
    pub async fn list_count(&self, query: &ListNotesQuery) -> usize {
        let state = self.state.lock().await;
        state.list_calls.iter().filter(|q| *q == query).count()
    }

    pub async fn create_count(&self) -> usize {
        self.state.lock().await.create_calls
    }

    /// Make the next `count` list calls fail with a network error
    pub async fn fail_next_lists(&self, count: usize) {
        self.state.lock().await.failing_lists = count;
    }

    /// Make create calls fail with a network error until reset
    pub async fn set_fail_creates(&self, fail: bool) {
        self.state.lock().await.fail_creates = fail;
    }

    /// Number of stored notes
    pub async fn len(&self) -> usize {
        self.state.lock().await.notes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.notes.is_empty()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl NotesBackend for InMemoryNotesBackend {
    async fn list_notes(&self, query: &ListNotesQuery) -> Result<ListNotesResponse> {
        let fail = {
            let mut state = self.state.lock().await;
            state.list_calls.push(query.clone());
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                true
            } else {
                false
            }
        };

        self.simulate_latency().await;
        if fail {
            return Err(NotesError::Network("list_notes unavailable".to_string()));
        }

        let state = self.state.lock().await;
        let matching: Vec<&NoteSummary> = match query.search.as_deref() {
            Some(needle) if !needle.is_empty() => {
                state.notes.iter().filter(|note| note.matches(needle)).collect()
            }
            _ => state.notes.iter().collect(),
        };

        let per_page = query.per_page.max(1) as usize;
        let total_items = matching.len();
        let total_pages = total_items.div_ceil(per_page).max(1);
        let offset = (query.page.max(1) as usize - 1).saturating_mul(per_page);

        let notes: Vec<NoteSummary> = matching
            .into_iter()
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect();

        debug!(
            "Listed {} notes (search: {:?}, page: {}/{})",
            notes.len(),
            query.search,
            query.page,
            total_pages
        );

        Ok(ListNotesResponse {
            notes,
            total_pages: total_pages as i64,
            total_items: total_items as i64,
        })
    }

    async fn create_note(&self, draft: &NoteDraft) -> Result<NoteSummary> {
        let fail = {
            let mut state = self.state.lock().await;
            state.create_calls += 1;
            state.fail_creates
        };

        self.simulate_latency().await;
        if fail {
            return Err(NotesError::Network("create_note unavailable".to_string()));
        }
        if draft.title.trim().is_empty() {
            return Err(NotesError::Validation("title must not be empty".to_string()));
        }

        let note = NoteSummary::from_draft(draft);
        self.state.lock().await.notes.insert(0, note.clone());
        info!("Created note {} ({})", note.id, note.tag);

        Ok(note)
    }
}
