//! Type definitions for notes

use crate::error::NotesError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag attached to every note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NoteTag {
    #[default]
    Todo,
    Work,
    Personal,
    Meeting,
    Shopping,
}

impl NoteTag {
    pub const ALL: [NoteTag; 5] = [
        NoteTag::Todo,
        NoteTag::Work,
        NoteTag::Personal,
        NoteTag::Meeting,
        NoteTag::Shopping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NoteTag::Todo => "Todo",
            NoteTag::Work => "Work",
            NoteTag::Personal => "Personal",
            NoteTag::Meeting => "Meeting",
            NoteTag::Shopping => "Shopping",
        }
    }
}

impl fmt::Display for NoteTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteTag {
    type Err = NotesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoteTag::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| NotesError::Validation(format!("Invalid tag: {}", s)))
    }
}

/// A note as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub tag: NoteTag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteSummary {
    /// Materialize a draft into a stored note with a fresh id
    pub fn from_draft(draft: &NoteDraft) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: draft.title.clone(),
            content: draft.content.clone(),
            tag: draft.tag,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive match against title and content
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle) || self.content.to_lowercase().contains(&needle)
    }
}

/// Payload of a create request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub tag: NoteTag,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>, tag: NoteTag) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tag,
        }
    }
}
