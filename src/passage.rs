//! The reading passage every highlight position is addressed against.
//!
//! Paragraph order and text are fixed; changing either silently shifts stored
//! positions.

use crate::selection::{DocumentTree, NodeId, SELECTABLE_CLASS, TextSelection};

pub const TITLE: &str = "Reading Test";

pub const INSTRUCTIONS: &str = "Select words you don't understand to look them up in the \
    dictionary. Highlight important concepts to create your study notes.";

const PARAGRAPHS: [&str; 5] = [
    "The concept of sustainability has gained significant traction in recent years. \
     Sustainability refers to meeting our present needs without compromising the ability of \
     future generations to meet their own needs. This approach integrates three main pillars: \
     environmental protection, social responsibility, and economic viability.",
    "Environmental sustainability focuses on maintaining the quality of our natural resources \
     and ensuring the long-term health of our planet. This includes reducing carbon emissions, \
     conserving biodiversity, and preventing pollution. Organizations increasingly implement \
     practices such as renewable energy usage and waste reduction to minimize their ecological \
     footprint.",
    "Social sustainability addresses human rights, equity, and community well-being. It \
     promotes fair labor practices, diversity and inclusion, and community engagement. \
     Companies that prioritize social sustainability create positive impacts for their \
     employees, customers, and communities.",
    "Economic sustainability ensures that businesses can maintain profitability while adhering \
     to environmental and social standards. This dimension emphasizes long-term financial \
     planning, responsible investment, and ethical business practices. Sustainable economic \
     models often lead to innovation, efficiency improvements, and enhanced brand reputation.",
    "The integration of these three dimensions presents both challenges and opportunities. \
     Organizations must balance short-term financial goals with long-term sustainability \
     objectives. However, those that successfully implement sustainable practices often gain \
     competitive advantages, including cost savings, improved stakeholder relations, and \
     enhanced market positioning.",
];

pub fn paragraphs() -> &'static [&'static str] {
    &PARAGRAPHS
}

pub fn paragraph(index: usize) -> Option<&'static str> {
    PARAGRAPHS.get(index).copied()
}

pub fn paragraph_count() -> usize {
    PARAGRAPHS.len()
}

/// The passage laid out as a document tree, one selectable `p` per paragraph.
#[derive(Debug, Clone)]
pub struct PassageDocument {
    pub tree: DocumentTree,
    paragraph_nodes: Vec<NodeId>,
}

impl PassageDocument {
    pub fn build() -> Self {
        let mut tree = DocumentTree::new();
        let mut paragraph_nodes = Vec::with_capacity(PARAGRAPHS.len());
        if let Some(container) = tree.append_element(DocumentTree::ROOT, "div", &[]) {
            if let Some(heading) = tree.append_element(container, "h5", &[]) {
                tree.append_text(heading, TITLE);
            }
            for text in PARAGRAPHS {
                let node = tree
                    .append_element(container, "p", &[SELECTABLE_CLASS])
                    .and_then(|p| tree.append_text(p, text));
                paragraph_nodes.extend(node);
            }
        }
        Self {
            tree,
            paragraph_nodes,
        }
    }

    /// Selection over the first occurrence of `needle`, searching only
    /// `paragraph` when given.
    pub fn find(&self, needle: &str, paragraph: Option<usize>) -> Option<TextSelection> {
        if needle.is_empty() {
            return None;
        }
        self.paragraph_nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| paragraph.is_none_or(|wanted| wanted == *index))
            .find_map(|(index, &node)| {
                let text = PARAGRAPHS[index];
                let byte_start = text.find(needle)?;
                let start = text[..byte_start].chars().count();
                Some(TextSelection::within(
                    node,
                    start,
                    start + needle.chars().count(),
                ))
            })
    }
}

impl Default for PassageDocument {
    fn default() -> Self {
        Self::build()
    }
}
