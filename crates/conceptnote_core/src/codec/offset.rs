//! Offset newtypes for the three coordinate spaces of the codec.
//!
//! # Responsibility
//! - Keep raw-markup, logical-text and tree positions apart at the type level.
//! - Own the only conversions between those spaces.
//!
//! # Invariants
//! - Every offset counts chars (Unicode scalar values), never bytes.
//! - A `LogicalOffset` is only meaningful against the projection it was
//!   computed from; edits to the document invalidate it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Char index into a raw markup string.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RawOffset(pub usize);

/// Char index into the markup-free logical-text projection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogicalOffset(pub usize);

/// Position in a document tree.
///
/// Entering or leaving a non-text node costs one position and every text
/// char costs one; document content starts at 0.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TreeOffset(pub usize);

impl RawOffset {
    pub fn get(self) -> usize {
        self.0
    }

    /// Moves forward over `text`.
    pub fn advance(self, text: &str) -> Self {
        Self(self.0 + text.chars().count())
    }
}

impl LogicalOffset {
    pub const ZERO: Self = Self(0);

    pub fn get(self) -> usize {
        self.0
    }

    /// Moves forward over `text`.
    pub fn advance(self, text: &str) -> Self {
        Self(self.0 + text.chars().count())
    }

    /// Moves forward by `len` chars.
    pub fn add(self, len: usize) -> Self {
        Self(self.0 + len)
    }

    /// Char distance from `start` to `self`, or `None` when `self` precedes it.
    pub fn distance_from(self, start: LogicalOffset) -> Option<usize> {
        self.0.checked_sub(start.0)
    }
}

impl TreeOffset {
    pub fn get(self) -> usize {
        self.0
    }

    /// Converts a logical offset that falls inside one text leaf into a tree
    /// position.
    ///
    /// `leaf_pos` is the tree position where the leaf starts and `leaf_start`
    /// the logical offset of its first char. Returns `None` when `at` lies
    /// before the leaf.
    pub fn from_leaf(
        leaf_pos: TreeOffset,
        leaf_start: LogicalOffset,
        at: LogicalOffset,
    ) -> Option<Self> {
        at.distance_from(leaf_start).map(|delta| Self(leaf_pos.0 + delta))
    }

    /// Converts a tree position that falls inside one text leaf back into
    /// logical space. Returns `None` when `self` lies before the leaf.
    pub fn to_logical(
        self,
        leaf_pos: TreeOffset,
        leaf_start: LogicalOffset,
    ) -> Option<LogicalOffset> {
        self.0.checked_sub(leaf_pos.0).map(|delta| leaf_start.add(delta))
    }
}

impl Display for RawOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for LogicalOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for TreeOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the substring of `text` covering chars `[start, end)`.
///
/// Out-of-range bounds are clamped to the text length.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |index: usize| {
        text.char_indices()
            .nth(index)
            .map_or(text.len(), |(byte, _)| byte)
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end.max(start));
    &text[start_byte..end_byte]
}

#[cfg(test)]
mod tests {
    use super::{slice_chars, LogicalOffset, TreeOffset};

    #[test]
    fn logical_offsets_count_chars_not_bytes() {
        assert_eq!(LogicalOffset::ZERO.advance("héllo"), LogicalOffset(5));
    }

    #[test]
    fn tree_offset_from_leaf_is_relative_to_leaf_start() {
        let pos = TreeOffset::from_leaf(TreeOffset(1), LogicalOffset(0), LogicalOffset(6));
        assert_eq!(pos, Some(TreeOffset(7)));
        assert_eq!(
            TreeOffset::from_leaf(TreeOffset(1), LogicalOffset(4), LogicalOffset(3)),
            None
        );
    }

    #[test]
    fn tree_to_logical_inverts_from_leaf() {
        let leaf_pos = TreeOffset(14);
        let leaf_start = LogicalOffset(11);
        let tree = TreeOffset::from_leaf(leaf_pos, leaf_start, LogicalOffset(13)).unwrap();
        assert_eq!(tree.to_logical(leaf_pos, leaf_start), Some(LogicalOffset(13)));
    }

    #[test]
    fn slice_chars_handles_multibyte_text() {
        assert_eq!(slice_chars("añb", 1, 2), "ñ");
        assert_eq!(slice_chars("abc", 2, 10), "c");
        assert_eq!(slice_chars("abc", 3, 3), "");
    }
}
