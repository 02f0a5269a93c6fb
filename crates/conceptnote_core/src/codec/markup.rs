//! Markup tokenizer shared by projection, extraction and tree parsing.
//!
//! # Responsibility
//! - Split markup into text and tag tokens in one left-to-right pass.
//! - Report each token's byte range and raw char offset.
//!
//! # Invariants
//! - A `<` starts a tag only when followed by an ASCII alphanumeric, `_`,
//!   `/`, `!` or `?` and the tag is closed later in the input; otherwise it
//!   is text. Digits are allowed so minted concept tags lex as tags.
//! - A tag closes at the first `>` outside a quoted attribute value; a
//!   comment closes at `-->`.
//! - Lexing is linear in the input length.
//! - Text means its decoded form (`logical_text`); `escape_text` is the
//!   inverse used when text is written back as markup.
//! - Concatenating every token's `source` reproduces the input exactly.

use crate::codec::offset::RawOffset;
use std::borrow::Cow;
use std::ops::Range;

/// Shape of one tag token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `<name ...>`
    Open,
    /// `</name>`
    Close,
    /// `<name ... />`
    SelfClosing,
    /// Comments, doctype and processing instructions.
    Other,
}

/// One tag construct, borrowed from the source markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    pub kind: TagKind,
    pub name: &'a str,
    attributes: &'a str,
}

impl<'a> Tag<'a> {
    fn parse(source: &'a str) -> Self {
        let inner = &source[1..source.len() - 1];
        if inner.starts_with('!') || inner.starts_with('?') {
            return Self {
                kind: TagKind::Other,
                name: "",
                attributes: "",
            };
        }

        let (kind, body) = match inner.strip_prefix('/') {
            Some(rest) => (TagKind::Close, rest),
            None => match inner.strip_suffix('/') {
                Some(rest) => (TagKind::SelfClosing, rest),
                None => (TagKind::Open, inner),
            },
        };

        let name_end = body
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(body.len());
        Self {
            kind,
            name: &body[..name_end],
            attributes: body[name_end..].trim(),
        }
    }

    /// Whether this tag is an opening (or self-closing) tag with `name`.
    pub fn opens(&self, name: &str) -> bool {
        matches!(self.kind, TagKind::Open | TagKind::SelfClosing) && self.name == name
    }

    /// Whether this tag is a closing tag with `name`.
    pub fn closes(&self, name: &str) -> bool {
        self.kind == TagKind::Close && self.name == name
    }

    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Returns the raw (undecoded) value of attribute `key`.
    ///
    /// Keys compare ASCII case-insensitively. A bare attribute yields `""`.
    pub fn attribute(&self, key: &str) -> Option<&'a str> {
        AttributeIter {
            rest: self.attributes,
        }
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
    }
}

struct AttributeIter<'a> {
    rest: &'a str,
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let after_name = rest[name_end..].trim_start();

        let Some(after_eq) = after_name.strip_prefix('=') else {
            self.rest = after_name;
            return Some((name, ""));
        };

        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &after_eq[1..];
                match body.find(quote) {
                    Some(end) => (&body[..end], &body[end + 1..]),
                    None => (body, ""),
                }
            }
            _ => {
                let end = after_eq
                    .find(char::is_whitespace)
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };
        self.rest = remaining;
        Some((name, value))
    }
}

/// Token payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Tag(Tag<'a>),
}

/// One token with its location in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lexeme<'a> {
    pub token: Token<'a>,
    /// Exact source slice of this token.
    pub source: &'a str,
    /// Byte range in the source.
    pub bytes: (usize, usize),
    /// Char offset of the token start in the source.
    pub raw: RawOffset,
}

impl<'a> Lexeme<'a> {
    pub fn byte_range(&self) -> Range<usize> {
        self.bytes.0..self.bytes.1
    }

    /// Raw text as written in the source.
    pub fn text(&self) -> Option<&'a str> {
        match self.token {
            Token::Text(text) => Some(text),
            Token::Tag(_) => None,
        }
    }

    /// Text with character references decoded; this is what the text means
    /// and what a rendered document shows.
    pub fn logical_text(&self) -> Option<Cow<'a, str>> {
        self.text().map(decode_text)
    }

    pub fn tag(&self) -> Option<Tag<'a>> {
        match self.token {
            Token::Tag(tag) => Some(tag),
            Token::Text(_) => None,
        }
    }
}

/// Decodes character references in a text run.
pub fn decode_text(text: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(text)
}

/// Escapes `&`, `<` and `>` so text can never read back as markup.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    html_escape::encode_text(text)
}

/// Single-pass markup tokenizer.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    raw: RawOffset,
    memo: ScanMemo,
}

/// Results of earlier tag scans that later scans can only repeat.
///
/// A tag scan is a walk whose next step depends only on the current byte and
/// whether it directly follows `=`. A later walk that reaches a state an
/// earlier walk failed from fails the same way, so each state is walked at
/// most once and lexing stays linear.
#[derive(Debug, Clone, Default)]
struct ScanMemo {
    /// Per byte: bit 0 marks the plain state dead, bit 1 the after-`=` state.
    dead: Vec<u8>,
    /// States visited by the current walk.
    trail: Vec<(usize, bool)>,
    /// First byte from which no `"` remains.
    no_double_quote_from: Option<usize>,
    /// First byte from which no `'` remains.
    no_single_quote_from: Option<usize>,
    /// First byte from which no `-->` remains.
    no_comment_close_from: Option<usize>,
    /// Tag located by the last text scan, as `(start, end)`.
    pending: Option<(usize, usize)>,
}

impl ScanMemo {
    fn is_dead(&self, index: usize, after_eq: bool) -> bool {
        self.dead
            .get(index)
            .is_some_and(|bits| bits & state_bit(after_eq) != 0)
    }

    fn bury_trail(&mut self, len: usize) {
        if self.dead.is_empty() {
            self.dead = vec![0; len];
        }
        for &(index, after_eq) in &self.trail {
            self.dead[index] |= state_bit(after_eq);
        }
    }
}

fn state_bit(after_eq: bool) -> u8 {
    if after_eq {
        0b10
    } else {
        0b01
    }
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            raw: RawOffset::default(),
            memo: ScanMemo::default(),
        }
    }

    /// End byte of the tag starting at `start`, if one starts there.
    fn tag_end(&mut self, start: usize) -> Option<usize> {
        if let Some((pending_start, end)) = self.memo.pending {
            if pending_start == start {
                return Some(end);
            }
        }
        let source = self.source;
        let bytes = source.as_bytes();
        if bytes.get(start) != Some(&b'<') {
            return None;
        }
        match bytes.get(start + 1) {
            Some(b) if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b'!' | b'?') => {}
            _ => return None,
        }
        if self.memo.is_dead(start + 1, false) {
            return None;
        }
        if source[start..].starts_with("<!--") {
            if let Some(end) = self.comment_end(start + 4) {
                return Some(end);
            }
        }
        self.scan_tag_close(start + 1)
    }

    /// Walks to the `>` closing a tag, skipping quoted attribute values.
    ///
    /// A failed walk marks every state it visited as dead.
    fn scan_tag_close(&mut self, from: usize) -> Option<usize> {
        let source = self.source;
        let bytes = source.as_bytes();
        self.memo.trail.clear();
        let mut index = from;
        let mut after_eq = false;
        let found = loop {
            if index >= bytes.len() || self.memo.is_dead(index, after_eq) {
                break None;
            }
            self.memo.trail.push((index, after_eq));
            match bytes[index] {
                b'>' => break Some(index + 1),
                quote @ (b'"' | b'\'') if after_eq => match self.find_quote(quote, index + 1) {
                    Some(close) => {
                        index = close + 1;
                        after_eq = false;
                        continue;
                    }
                    None => break None,
                },
                b'=' => after_eq = true,
                byte if byte.is_ascii_whitespace() => {}
                _ => after_eq = false,
            }
            index += 1;
        };
        if found.is_none() {
            self.memo.bury_trail(bytes.len());
        }
        found
    }

    fn find_quote(&mut self, quote: u8, from: usize) -> Option<usize> {
        let memo = if quote == b'"' {
            &mut self.memo.no_double_quote_from
        } else {
            &mut self.memo.no_single_quote_from
        };
        if memo.is_some_and(|bound| from >= bound) {
            return None;
        }
        let found = self.source.as_bytes()[from..]
            .iter()
            .position(|&byte| byte == quote)
            .map(|offset| from + offset);
        if found.is_none() {
            *memo = Some(from);
        }
        found
    }

    fn comment_end(&mut self, from: usize) -> Option<usize> {
        if self
            .memo
            .no_comment_close_from
            .is_some_and(|bound| from >= bound)
        {
            return None;
        }
        let found = self.source[from..]
            .find("-->")
            .map(|offset| from + offset + 3);
        if found.is_none() {
            self.memo.no_comment_close_from = Some(from);
        }
        found
    }

    /// End byte of the text run starting at `start`; remembers the tag that
    /// ends it.
    fn text_end(&mut self, start: usize) -> usize {
        let source = self.source;
        let len = source.len();
        let mut index = start + 1;
        while index < len {
            let Some(offset) = source.as_bytes()[index..]
                .iter()
                .position(|&byte| byte == b'<')
            else {
                break;
            };
            // `<` is ASCII, so every index holding it is a char boundary.
            let candidate = index + offset;
            if let Some(end) = self.tag_end(candidate) {
                self.memo.pending = Some((candidate, end));
                return candidate;
            }
            index = candidate + 1;
        }
        len
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Lexeme<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.source.len() {
            return None;
        }

        let start = self.pos;
        let (end, is_tag) = match self.tag_end(start) {
            Some(end) => (end, true),
            None => (self.text_end(start), false),
        };
        let source = &self.source[start..end];
        let token = if is_tag {
            Token::Tag(Tag::parse(source))
        } else {
            Token::Text(source)
        };

        let lexeme = Lexeme {
            token,
            source,
            bytes: (start, end),
            raw: self.raw,
        };
        self.pos = end;
        self.raw = self.raw.advance(source);
        Some(lexeme)
    }
}
