//! Notes data model
//!
//! Types exchanged with the notes backend: the note itself, the create
//! payload, and the wire shape of a list response together with its
//! validation into a cache-ready [`QueryResult`](crate::cache::QueryResult).

pub mod page;
pub mod types;

pub use page::{ListNotesQuery, ListNotesResponse, DEFAULT_PER_PAGE};
pub use types::{NoteDraft, NoteSummary, NoteTag};
