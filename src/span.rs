use serde::{Deserialize, Serialize};

/// Position of a highlight inside the reading passage.
///
/// Offsets count `char`s of the paragraph text, `end_offset` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub paragraph_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Span {
    pub const fn new(paragraph_index: usize, start_offset: usize, end_offset: usize) -> Self {
        Self {
            paragraph_index,
            start_offset,
            end_offset,
        }
    }

    /// A span is inline-renderable only when it covers at least one char.
    pub fn is_valid(&self) -> bool {
        self.end_offset > self.start_offset
    }

    /// Valid and pointing at one of `paragraph_count` paragraphs.
    pub fn is_addressable(&self, paragraph_count: usize) -> bool {
        self.is_valid() && self.paragraph_index < paragraph_count
    }

    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trims the span to a paragraph of `paragraph_len` chars. Returns `None`
    /// when nothing of the span is left.
    pub fn clamp_to(&self, paragraph_len: usize) -> Option<Span> {
        let end = self.end_offset.min(paragraph_len);
        if self.start_offset >= end {
            return None;
        }
        Some(Span::new(self.paragraph_index, self.start_offset, end))
    }
}
