//! Logical-text projection.
//!
//! The projection is the markup with every tag construct removed and all
//! other text kept in order, character references decoded. It exists only to give extraction
//! and mapping one shared offset space; it is never persisted or shown.

use crate::codec::markup::Lexer;
use crate::codec::offset::LogicalOffset;

/// Returns `markup` with every tag removed and its text decoded.
pub fn project_logical_text(markup: &str) -> String {
    Lexer::new(markup)
        .filter_map(|lexeme| lexeme.logical_text())
        .collect()
}

/// Char length of the logical-text projection of `markup`.
pub fn logical_length(markup: &str) -> LogicalOffset {
    Lexer::new(markup)
        .filter_map(|lexeme| lexeme.logical_text())
        .fold(LogicalOffset::ZERO, |offset, text| offset.advance(&text))
}
