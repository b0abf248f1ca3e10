//! Highlights and dictionary lookups over a fixed reading passage.
//!
//! Positions are `(paragraphIndex, startOffset, endOffset)` triples over the
//! passage's paragraphs, in chars. The [`selection`] module produces them,
//! the [`repository`] stores them server side, the [`store`] caches them on
//! the client and [`render`] turns them back into styled segments.

pub mod dictionary;
pub mod highlight;
pub mod passage;
pub mod render;
pub mod repository;
pub mod selection;
pub mod span;
pub mod store;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub mod sync;
#[cfg(feature = "web")]
pub mod web;

pub use highlight::{DEFAULT_COLOR, Highlight, HighlightDraft, NotePatch};
pub use render::{Segment, render_paragraph};
pub use selection::{DocumentTree, TextSelection, resolve_selection};
pub use span::Span;
pub use store::HighlightStore;
