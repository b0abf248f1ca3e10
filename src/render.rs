//! Splits a paragraph into plain and highlighted segments.
//!
//! The segments of a paragraph always concatenate back to the paragraph text.
//! When highlights overlap, the one sorted first owns the shared chars; see
//! [`contested_region`].

use crate::highlight::Highlight;
use crate::passage;
use crate::span::Span;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment<'a> {
    Plain {
        text: &'a str,
    },
    Highlighted {
        text: &'a str,
        color: &'a str,
        #[serde(rename = "highlightId")]
        highlight_id: &'a str,
    },
}

impl<'a> Segment<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Segment::Plain { text } | Segment::Highlighted { text, .. } => *text,
        }
    }

    pub fn color(&self) -> Option<&'a str> {
        match self {
            Segment::Plain { .. } => None,
            Segment::Highlighted { color, .. } => Some(*color),
        }
    }

    pub fn is_highlighted(&self) -> bool {
        matches!(self, Segment::Highlighted { .. })
    }
}

/// Renders paragraph `paragraph_index` with every highlight addressed to it.
///
/// Highlights without a valid position, or pointing elsewhere, are skipped.
/// Spans are ordered by start offset, shorter first on ties, then by input
/// order. Spans reaching past the paragraph end are clamped to it.
pub fn render_paragraph<'a, I>(
    text: &'a str,
    paragraph_index: usize,
    highlights: I,
) -> Vec<Segment<'a>>
where
    I: IntoIterator<Item = &'a Highlight>,
{
    let bounds = char_boundaries(text);
    let char_len = bounds.len() - 1;

    let mut spans: Vec<(Span, &'a Highlight)> = highlights
        .into_iter()
        .filter_map(|highlight| {
            highlight
                .inline_span()
                .filter(|span| span.paragraph_index == paragraph_index)
                .and_then(|span| span.clamp_to(char_len))
                .map(|span| (span, highlight))
        })
        .collect();
    spans.sort_by(|(a, _), (b, _)| {
        a.start_offset
            .cmp(&b.start_offset)
            .then_with(|| a.len().cmp(&b.len()))
    });

    let mut segments = Vec::with_capacity(spans.len() * 2 + 1);
    let mut cursor = 0;
    for (span, highlight) in spans {
        let Some((start, end)) = contested_region(cursor, &span) else {
            continue;
        };
        if start > cursor {
            segments.push(Segment::Plain {
                text: &text[bounds[cursor]..bounds[start]],
            });
        }
        segments.push(Segment::Highlighted {
            text: &text[bounds[start]..bounds[end]],
            color: &highlight.color,
            highlight_id: &highlight.id,
        });
        cursor = cursor.max(end);
    }
    if cursor < char_len {
        segments.push(Segment::Plain {
            text: &text[bounds[cursor]..],
        });
    }
    segments
}

/// The part of `span` still drawable once everything before `cursor` has
/// been emitted. An overlapping prefix is cut off; a span entirely behind the
/// cursor is dropped.
///
/// Known limitation: the contested chars keep the color of the earlier span,
/// the later highlight is only visible where it extends past it.
pub fn contested_region(cursor: usize, span: &Span) -> Option<(usize, usize)> {
    if span.end_offset <= cursor {
        return None;
    }
    Some((span.start_offset.max(cursor), span.end_offset))
}

/// The whole passage with highlights applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassageView<'a> {
    pub title: &'static str,
    pub paragraphs: Vec<Vec<Segment<'a>>>,
    /// Highlights with no inline position, listed instead of drawn.
    pub note_only: Vec<&'a Highlight>,
}

pub fn render_passage(highlights: &[Highlight]) -> PassageView<'_> {
    let paragraphs = passage::paragraphs()
        .iter()
        .enumerate()
        .map(|(index, text)| render_paragraph(text, index, highlights))
        .collect();
    PassageView {
        title: passage::TITLE,
        paragraphs,
        note_only: highlights.iter().filter(|h| h.is_note_only()).collect(),
    }
}

/// Joins segment texts, ignoring style.
pub fn plain_text(segments: &[Segment<'_>]) -> String {
    segments.iter().map(Segment::text).collect()
}

/// Byte offset of every char boundary, including the end of the text.
fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect()
}
