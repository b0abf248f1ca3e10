//! Turns a live text selection into a paragraph-relative [`Span`].
//!
//! The document is modelled as a small tree of element and text nodes. A
//! selection is a pair of DOM-style boundaries: inside a text node the offset
//! counts chars, inside an element it counts children. Paragraph units are
//! `p` elements carrying the [`SELECTABLE_CLASS`] class, numbered in document
//! order.

use crate::span::Span;
use serde::Serialize;
use tracing::debug;

pub type NodeId = usize;

/// Class marking the paragraphs highlights are addressed against.
pub const SELECTABLE_CLASS: &str = "selectable-text";
pub const PARAGRAPH_TAG: &str = "p";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String, classes: Vec<String> },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: Vec<Node>,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    pub const ROOT: NodeId = 0;

    /// An empty document with a `body` root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Element {
                    tag: "body".to_string(),
                    classes: Vec::new(),
                },
            }],
        }
    }

    /// Appends an element under `parent`. Returns `None` when `parent` does not
    /// exist or is a text node.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        classes: &[&str],
    ) -> Option<NodeId> {
        self.append(
            parent,
            NodeKind::Element {
                tag: tag.to_string(),
                classes: classes.iter().map(|class| class.to_string()).collect(),
            },
        )
    }

    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> Option<NodeId> {
        self.append(parent, NodeKind::Text(text.into()))
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> Option<NodeId> {
        match self.nodes.get(parent).map(|node| &node.kind) {
            Some(NodeKind::Element { .. }) => {}
            _ => return None,
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(id);
        Some(id)
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node).map(|node| &node.kind)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|node| node.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Element { .. }) => {
                for &child in self.children(node) {
                    self.collect_text(child, out);
                }
            }
            None => {}
        }
    }

    /// Length of [`Self::text_content`] in chars.
    pub fn text_len(&self, node: NodeId) -> usize {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => text.chars().count(),
            Some(NodeKind::Element { .. }) => self
                .children(node)
                .iter()
                .map(|&child| self.text_len(child))
                .sum(),
            None => 0,
        }
    }

    fn is_paragraph(&self, node: NodeId) -> bool {
        matches!(
            self.kind(node),
            Some(NodeKind::Element { tag, .. }) if tag.eq_ignore_ascii_case(PARAGRAPH_TAG)
        )
    }

    fn is_selectable_paragraph(&self, node: NodeId) -> bool {
        self.is_paragraph(node)
            && matches!(
                self.kind(node),
                Some(NodeKind::Element { classes, .. }) if classes.iter().any(|c| c == SELECTABLE_CLASS)
            )
    }

    /// Selectable paragraph units in document order.
    pub fn selectable_paragraphs(&self) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(node) = stack.pop() {
            if self.is_selectable_paragraph(node) {
                found.push(node);
            }
            stack.extend(self.children(node).iter().rev());
        }
        found
    }

    /// Nearest `p` element at or above `node`.
    pub fn enclosing_paragraph(&self, node: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.is_paragraph(id) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    /// Char offset of `boundary` inside the text content of `ancestor`, or
    /// `None` when the boundary lies outside it.
    pub fn offset_within(&self, ancestor: NodeId, boundary: Boundary) -> Option<usize> {
        let local = match self.kind(boundary.node)? {
            NodeKind::Text(text) => boundary.offset.min(text.chars().count()),
            NodeKind::Element { .. } => self
                .children(boundary.node)
                .iter()
                .take(boundary.offset)
                .map(|&child| self.text_len(child))
                .sum(),
        };
        let mut total = local;
        let mut node = boundary.node;
        while node != ancestor {
            let parent = self.parent(node)?;
            total += self
                .children(parent)
                .iter()
                .take_while(|&&sibling| sibling != node)
                .map(|&sibling| self.text_len(sibling))
                .sum::<usize>();
            node = parent;
        }
        Some(total)
    }
}

/// One end of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub const fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// A selection as the user made it: the anchor is where it started and may
/// come after the focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSelection {
    pub anchor: Boundary,
    pub focus: Boundary,
}

impl TextSelection {
    pub const fn new(anchor: Boundary, focus: Boundary) -> Self {
        Self { anchor, focus }
    }

    /// Both ends inside one text node.
    pub const fn within(node: NodeId, start: usize, end: usize) -> Self {
        Self::new(Boundary::new(node, start), Boundary::new(node, end))
    }

    /// Boundaries in document order, with their document-wide char offsets.
    fn ordered(&self, tree: &DocumentTree) -> Option<((Boundary, usize), (Boundary, usize))> {
        let anchor = tree.offset_within(DocumentTree::ROOT, self.anchor)?;
        let focus = tree.offset_within(DocumentTree::ROOT, self.focus)?;
        if focus < anchor {
            Some(((self.focus, focus), (self.anchor, anchor)))
        } else {
            Some(((self.anchor, anchor), (self.focus, focus)))
        }
    }
}

/// Outcome of resolving a non-empty selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSelection {
    /// Selected text, trimmed.
    pub text: String,
    /// `None` when the selection could not be tied to a paragraph; the caller
    /// may still create a note-only highlight from `text`.
    pub position: Option<Span>,
}

/// Resolves `selection` against `tree`.
///
/// Returns `None` when nothing but whitespace is selected. The span starts in
/// the paragraph holding the selection start; an end beyond that paragraph is
/// clamped to its last char, and surrounding whitespace is left out so the
/// span covers exactly the trimmed text.
pub fn resolve_selection(
    tree: &DocumentTree,
    selection: &TextSelection,
) -> Option<ResolvedSelection> {
    let ((start, start_global), (end, end_global)) = selection.ordered(tree)?;
    let text: String = tree
        .text_content(DocumentTree::ROOT)
        .chars()
        .skip(start_global)
        .take(end_global - start_global)
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let position = locate(tree, start, end);
    if position.is_none() {
        debug!(text, "selection is not inside a selectable paragraph");
    }
    Some(ResolvedSelection {
        text: text.to_string(),
        position,
    })
}

fn locate(tree: &DocumentTree, start: Boundary, end: Boundary) -> Option<Span> {
    let paragraph = tree.enclosing_paragraph(start.node)?;
    let paragraph_index = tree
        .selectable_paragraphs()
        .iter()
        .position(|&candidate| candidate == paragraph)?;
    let chars: Vec<char> = tree.text_content(paragraph).chars().collect();
    let mut start_offset = tree.offset_within(paragraph, start)?.min(chars.len());
    let mut end_offset = tree
        .offset_within(paragraph, end)
        .unwrap_or(chars.len())
        .min(chars.len());
    while start_offset < end_offset && chars[start_offset].is_whitespace() {
        start_offset += 1;
    }
    while end_offset > start_offset && chars[end_offset - 1].is_whitespace() {
        end_offset -= 1;
    }
    let span = Span::new(paragraph_index, start_offset, end_offset);
    span.is_valid().then_some(span)
}

#[cfg(feature = "client")]
pub use settle::{SETTLE_DELAY, SelectionDebouncer, TOUCH_SETTLE_DELAY};

#[cfg(feature = "client")]
mod settle {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Delay before a pointer selection is read back.
    pub const SETTLE_DELAY: Duration = Duration::from_millis(300);
    /// Touch selections keep moving for longer after the gesture ends.
    pub const TOUCH_SETTLE_DELAY: Duration = Duration::from_millis(600);

    /// Debounces selection-changed signals: only the latest signal within the
    /// delay window settles.
    #[derive(Debug)]
    pub struct SelectionDebouncer {
        delay: Duration,
        generation: AtomicU64,
    }

    impl Default for SelectionDebouncer {
        fn default() -> Self {
            Self::new(SETTLE_DELAY)
        }
    }

    impl SelectionDebouncer {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                generation: AtomicU64::new(0),
            }
        }

        pub fn for_touch() -> Self {
            Self::new(TOUCH_SETTLE_DELAY)
        }

        pub fn delay(&self) -> Duration {
            self.delay
        }

        /// Waits out the delay. Resolves `true` when no later signal or
        /// cancel arrived in the meantime, in which case the caller reads the
        /// selection.
        pub async fn settle(&self) -> bool {
            let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            self.generation.load(Ordering::SeqCst) == ticket
        }

        /// Invalidates every pending [`Self::settle`].
        pub fn cancel(&self) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn only_the_latest_signal_settles() {
            let debouncer = SelectionDebouncer::default();
            let first = debouncer.settle();
            let second = async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                debouncer.settle().await
            };
            let (first, second) = tokio::join!(first, second);
            assert!(!first);
            assert!(second);
        }

        #[tokio::test(start_paused = true)]
        async fn cancel_discards_pending_signal() {
            let debouncer = SelectionDebouncer::for_touch();
            assert_eq!(debouncer.delay(), TOUCH_SETTLE_DELAY);
            let pending = debouncer.settle();
            let cancel = async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                debouncer.cancel();
            };
            let (settled, ()) = tokio::join!(pending, cancel);
            assert!(!settled);
            assert!(debouncer.settle().await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        tree: DocumentTree,
        first: NodeId,
        social: NodeId,
        bold: NodeId,
        second_paragraph: NodeId,
        heading: NodeId,
        plain: NodeId,
    }

    // <div>
    //   <h6>Reading Test</h6>
    //   <p class="selectable-text">The concept of sustainability has gained traction.</p>
    //   <p class="selectable-text">Social <b>sustainability</b> addresses equity.</p>
    //   <p>Unselectable paragraph.</p>
    // </div>
    fn fixture() -> Fixture {
        let mut tree = DocumentTree::new();
        let div = tree.append_element(DocumentTree::ROOT, "div", &[]).unwrap();
        let h6 = tree.append_element(div, "h6", &[]).unwrap();
        let heading = tree.append_text(h6, "Reading Test").unwrap();
        let p1 = tree.append_element(div, "p", &[SELECTABLE_CLASS]).unwrap();
        let first = tree
            .append_text(p1, "The concept of sustainability has gained traction.")
            .unwrap();
        let p2 = tree.append_element(div, "P", &["body", SELECTABLE_CLASS]).unwrap();
        let social = tree.append_text(p2, "Social ").unwrap();
        let b = tree.append_element(p2, "b", &[]).unwrap();
        let bold = tree.append_text(b, "sustainability").unwrap();
        tree.append_text(p2, " addresses equity.").unwrap();
        let p3 = tree.append_element(div, "p", &[]).unwrap();
        let plain = tree.append_text(p3, "Unselectable paragraph.").unwrap();
        Fixture {
            tree,
            first,
            social,
            bold,
            second_paragraph: p2,
            heading,
            plain,
        }
    }

    #[test]
    fn resolves_offsets_inside_a_single_text_node() {
        let f = fixture();
        let resolved = resolve_selection(&f.tree, &TextSelection::within(f.first, 15, 29)).unwrap();
        assert_eq!(resolved.text, "sustainability");
        assert_eq!(resolved.position, Some(Span::new(0, 15, 29)));
    }

    #[test]
    fn offsets_are_relative_to_the_paragraph_not_the_text_node() {
        let f = fixture();
        let resolved = resolve_selection(&f.tree, &TextSelection::within(f.bold, 0, 14)).unwrap();
        assert_eq!(resolved.text, "sustainability");
        assert_eq!(resolved.position, Some(Span::new(1, 7, 21)));
    }

    #[test]
    fn element_boundaries_count_children() {
        let f = fixture();
        let selection = TextSelection::new(
            Boundary::new(f.second_paragraph, 1),
            Boundary::new(f.second_paragraph, 2),
        );
        let resolved = resolve_selection(&f.tree, &selection).unwrap();
        assert_eq!(resolved.text, "sustainability");
        assert_eq!(resolved.position, Some(Span::new(1, 7, 21)));
    }

    #[test]
    fn backward_selection_is_normalized() {
        let f = fixture();
        let selection = TextSelection::new(Boundary::new(f.bold, 14), Boundary::new(f.social, 0));
        let resolved = resolve_selection(&f.tree, &selection).unwrap();
        assert_eq!(resolved.text, "Social sustainability");
        assert_eq!(resolved.position, Some(Span::new(1, 0, 21)));
    }

    #[test]
    fn surrounding_whitespace_is_trimmed_from_text_and_span() {
        let f = fixture();
        let resolved = resolve_selection(&f.tree, &TextSelection::within(f.first, 3, 12)).unwrap();
        assert_eq!(resolved.text, "concept");
        assert_eq!(resolved.position, Some(Span::new(0, 4, 11)));
    }

    #[test]
    fn blank_selection_resolves_to_nothing() {
        let f = fixture();
        assert!(resolve_selection(&f.tree, &TextSelection::within(f.first, 3, 4)).is_none());
        assert!(resolve_selection(&f.tree, &TextSelection::within(f.first, 8, 8)).is_none());
    }

    #[test]
    fn unselectable_or_unanchored_text_keeps_text_without_position() {
        let f = fixture();
        let plain = resolve_selection(&f.tree, &TextSelection::within(f.plain, 0, 12)).unwrap();
        assert_eq!(plain.text, "Unselectable");
        assert_eq!(plain.position, None);

        let heading = resolve_selection(&f.tree, &TextSelection::within(f.heading, 0, 7)).unwrap();
        assert_eq!(heading.text, "Reading");
        assert_eq!(heading.position, None);
    }

    #[test]
    fn selection_running_into_the_next_paragraph_is_clamped() {
        let f = fixture();
        let selection = TextSelection::new(Boundary::new(f.first, 41), Boundary::new(f.social, 6));
        let resolved = resolve_selection(&f.tree, &selection).unwrap();
        assert_eq!(resolved.text, "traction.Social");
        assert_eq!(resolved.position, Some(Span::new(0, 41, 50)));
    }

    #[test]
    fn text_nodes_cannot_have_children() {
        let mut f = fixture();
        assert!(f.tree.append_text(f.first, "nested").is_none());
        assert!(f.tree.append_element(999, "p", &[]).is_none());
    }

    #[test]
    fn paragraphs_are_numbered_in_document_order() {
        let f = fixture();
        let paragraphs = f.tree.selectable_paragraphs();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[1], f.second_paragraph);
        assert_eq!(f.tree.text_len(f.second_paragraph), 39);
    }
}
