use crate::highlight::Highlight;
use std::collections::HashSet;
use tracing::warn;

/// Client-side cache of highlights in insertion (display) order.
///
/// Ids are unique: inserting a known id is a no-op. The store is not indexed
/// by paragraph, readers filter linearly.
#[derive(Debug, Clone, Default)]
pub struct HighlightStore {
    highlights: Vec<Highlight>,
}

impl HighlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `highlight` unless its id is already present. Returns whether
    /// the store changed.
    pub fn add_or_ignore(&mut self, highlight: Highlight) -> bool {
        if self.contains(&highlight.id) {
            return false;
        }
        self.highlights.push(highlight);
        true
    }

    /// Replaces the whole collection. Repeated ids keep their first occurrence.
    pub fn replace_all(&mut self, highlights: Vec<Highlight>) {
        let mut seen = HashSet::with_capacity(highlights.len());
        let mut kept = Vec::with_capacity(highlights.len());
        for highlight in highlights {
            if seen.insert(highlight.id.clone()) {
                kept.push(highlight);
            } else {
                warn!(id = %highlight.id, "dropping duplicate highlight id");
            }
        }
        self.highlights = kept;
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.highlights.len();
        self.highlights.retain(|highlight| highlight.id != id);
        self.highlights.len() != before
    }

    /// Sets the note of the matching entry; every other field stays as is.
    pub fn update_note(&mut self, id: &str, note: Option<String>) -> bool {
        match self.highlights.iter_mut().find(|highlight| highlight.id == id) {
            Some(highlight) => {
                highlight.note = note;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Highlight> {
        self.highlights.iter().find(|highlight| highlight.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Highlight> + '_ {
        self.highlights.iter()
    }

    pub fn as_slice(&self) -> &[Highlight] {
        &self.highlights
    }

    /// Highlights whose position points at `paragraph_index`, valid or not.
    pub fn in_paragraph(&self, paragraph_index: usize) -> impl Iterator<Item = &Highlight> + '_ {
        self.highlights.iter().filter(move |highlight| {
            highlight
                .position
                .is_some_and(|span| span.paragraph_index == paragraph_index)
        })
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }
}
