use crate::passage;
use crate::span::Span;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Color used when a highlight is created without one.
pub const DEFAULT_COLOR: &str = "#ffeb3b";

/// Prefix of ids minted on the client before the server has answered.
pub const LOCAL_ID_PREFIX: &str = "local-";

const OBJECT_ID_COUNTER_MASK: u32 = 0x00ff_ffff;

static OBJECT_ID_COUNTER: Lazy<AtomicU32> =
    Lazy::new(|| AtomicU32::new(thread_rng().gen_range(0..OBJECT_ID_COUNTER_MASK)));
static PROCESS_ENTROPY: Lazy<u64> = Lazy::new(|| thread_rng().gen_range(0..(1u64 << 40)));

/// A persisted annotation over the reading passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    #[serde(alias = "_id")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default = "default_color", deserialize_with = "color_or_default")]
    pub color: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Span>,
}

impl Highlight {
    /// The position, if it can be drawn inline: non-empty and pointing at a
    /// paragraph of the passage.
    pub fn inline_span(&self) -> Option<Span> {
        self.position
            .filter(|span| span.is_addressable(passage::paragraph_count()))
    }

    /// Highlights without a usable position are listed but never drawn inline.
    pub fn is_note_only(&self) -> bool {
        self.inline_span().is_none()
    }

    pub fn has_note(&self) -> bool {
        self.note
            .as_deref()
            .map(|note| !note.trim().is_empty())
            .unwrap_or(false)
    }

    /// True while the record only exists on the client.
    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HighlightDraft {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Span>,
}

impl HighlightDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            note: None,
            color: None,
            position: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_position(mut self, position: Option<Span>) -> Self {
        self.position = position;
        self
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.text.trim().is_empty() {
            return Err(DraftError::EmptyText);
        }
        if let Some(position) = self.position {
            if !position.is_valid() {
                return Err(DraftError::InvalidPosition {
                    start: position.start_offset,
                    end: position.end_offset,
                });
            }
        }
        Ok(())
    }

    /// Builds the stored record. Callers validate first.
    pub fn into_highlight(self, id: String, created_at: DateTime<Utc>) -> Highlight {
        Highlight {
            id,
            text: self.text,
            note: normalize_note(self.note),
            color: normalize_color(self.color),
            created_at,
            position: self.position,
        }
    }

    /// The record shown locally while (or instead of) the server confirming it.
    pub fn optimistic(&self) -> Highlight {
        self.clone().into_highlight(generate_local_id(), Utc::now())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("highlight text must not be empty")]
    EmptyText,
    #[error("invalid position: end offset {end} must be greater than start offset {start}")]
    InvalidPosition { start: usize, end: usize },
}

/// Body of an update request; the note is the only mutable field.
///
/// A missing `note` leaves the record alone, `null` or a blank string clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotePatch {
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub note: Option<Option<String>>,
}

impl NotePatch {
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            note: Some(Some(note.into())),
        }
    }

    pub fn clear() -> Self {
        Self { note: Some(None) }
    }

    /// `None` clears the note.
    pub fn set(note: Option<String>) -> Self {
        Self { note: Some(note) }
    }

    pub fn apply(self, highlight: &mut Highlight) {
        if let Some(note) = self.note {
            highlight.note = normalize_note(note);
        }
    }
}

/// Keeps an explicit `null` apart from an absent field.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Blank notes are stored as "no note".
pub fn normalize_note(note: Option<String>) -> Option<String> {
    note.filter(|note| !note.trim().is_empty())
}

pub fn normalize_color(color: Option<String>) -> String {
    color
        .map(|color| color.trim().to_string())
        .filter(|color| !color.is_empty())
        .unwrap_or_else(default_color)
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn color_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_color(raw))
}

/// 24 hex chars: creation seconds, per-process entropy, rolling counter.
pub fn generate_object_id() -> String {
    let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
    let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed) & OBJECT_ID_COUNTER_MASK;
    format!("{seconds:08x}{:010x}{counter:06x}", *PROCESS_ENTROPY)
}

pub fn generate_local_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "{LOCAL_ID_PREFIX}{}-{suffix}",
        Utc::now().timestamp_millis()
    )
}
