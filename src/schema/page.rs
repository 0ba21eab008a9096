//! List request/response shapes and their boundary validation

use crate::cache::QueryResult;
use crate::error::{NotesError, Result};
use crate::schema::types::NoteSummary;
use serde::{Deserialize, Serialize};

/// Page size used by the notes list
pub const DEFAULT_PER_PAGE: u32 = 12;

/// Parameters of a `list_notes` call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotesQuery {
    /// Search text; `None` when the search field is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl ListNotesQuery {
    /// Build a query, mapping an empty search to "not specified"
    pub fn new(search: &str, page: u32, per_page: u32) -> Self {
        Self {
            search: if search.is_empty() {
                None
            } else {
                Some(search.to_string())
            },
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }
}

/// Raw list response as returned by the backend
///
/// Counts are kept signed so that a misbehaving backend is caught by
/// validation instead of failing deserialization with an opaque message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotesResponse {
    pub notes: Vec<NoteSummary>,
    pub total_pages: i64,
    pub total_items: i64,
}

impl ListNotesResponse {
    /// Parse an untyped payload
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| NotesError::InvalidPayload(format!("malformed list response: {}", e)))
    }
}

impl TryFrom<ListNotesResponse> for QueryResult<NoteSummary> {
    type Error = NotesError;

    fn try_from(response: ListNotesResponse) -> Result<Self> {
        if response.total_items < 0 {
            return Err(NotesError::InvalidPayload(format!(
                "totalItems must not be negative, got {}",
                response.total_items
            )));
        }

        let total_items = response.total_items as u64;
        if (response.notes.len() as u64) > total_items {
            return Err(NotesError::InvalidPayload(format!(
                "page holds {} notes but totalItems is {}",
                response.notes.len(),
                total_items
            )));
        }

        // An empty result is reported as zero pages by some backends
        let total_pages = u32::try_from(response.total_pages.max(1)).map_err(|_| {
            NotesError::InvalidPayload(format!("totalPages out of range: {}", response.total_pages))
        })?;

        Ok(QueryResult::new(response.notes, total_pages, total_items))
    }
}
