//! Seam between the codec and a rich-text document tree.
//!
//! The tree belongs to the editor. The codec reads its text leaves, applies
//! concept marks through this trait, and asks it for its generic markup
//! rendering. Nothing here knows how the tree stores nodes.

use crate::codec::offset::TreeOffset;
use crate::model::annotation::ConceptTag;
use std::ops::Range;

/// One text-bearing leaf, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLeafRef<'a> {
    /// Tree position of the leaf's first char.
    pub pos: TreeOffset,
    pub text: &'a str,
}

/// Operations the codec needs from a document tree.
pub trait ConceptTree {
    /// Text-bearing leaves in document order, including empty ones.
    fn text_leaves(&self) -> Vec<TextLeafRef<'_>>;

    /// Total size of the document content in tree positions.
    fn content_size(&self) -> TreeOffset;

    /// Sets the concept mark on `range`, replacing any concept mark there.
    ///
    /// `tag == None` applies a tag-less placeholder mark. An empty range
    /// inserts a zero-length marked placeholder. Returns `false` when
    /// nothing could be marked.
    fn set_concept_mark(&mut self, range: Range<TreeOffset>, tag: Option<&ConceptTag>) -> bool;

    /// Removes concept marks on `range`.
    fn unset_concept_mark(&mut self, range: Range<TreeOffset>);

    /// Text covered by `range`, leaf boundaries ignored.
    fn text_between(&self, range: Range<TreeOffset>) -> String;

    /// Tag of the concept mark on the char right after `pos`, if any.
    fn concept_tag_at(&self, pos: TreeOffset) -> Option<ConceptTag>;

    /// Moves the selection to the start of the document.
    fn reset_selection(&mut self);

    /// Generic markup rendering; concept marks become
    /// `<span data-concept-tag="TAG">` wrappers.
    fn render_html(&self) -> String;
}
