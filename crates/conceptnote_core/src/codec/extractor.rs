//! Concept tag extraction.
//!
//! # Responsibility
//! - Find `<Concept><TAG>inner</TAG></Concept>` wrappers in persisted markup.
//! - Emit annotations with offsets in the logical-text space of the
//!   pre-replacement markup.
//! - Produce the de-tagged body handed to the tree builder.
//!
//! # Invariants
//! - Offsets are computed in the collect pass; the body is built afterwards
//!   from the collected matches, never while scanning.
//! - Malformed regions yield a `DecodeIssue`, no annotation, and stay
//!   verbatim in the body.
//! - No two emitted annotations share a tag.
//! - When the body no longer projects to the logical text (removing a
//!   wrapper joined text into a tag) a `ProjectionMismatch` issue is raised.

use crate::codec::markup::{Lexeme, Lexer, TagKind};
use crate::codec::offset::{LogicalOffset, RawOffset};
use crate::codec::projector::project_logical_text;
use crate::model::annotation::{Annotation, ConceptTag, CONCEPT_ELEMENT};
use log::{debug, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;

/// Kind of malformed concept markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeIssueKind {
    /// `<Concept>` not immediately followed by a bare `<TAG>`.
    MissingInnerTag,
    /// A closing tag other than `</TAG></Concept>` ended the inner text.
    MismatchedClose,
    /// Another `<Concept>` opened inside the inner text.
    NestedConcept,
    /// Input ended before the wrapper closed.
    Unterminated,
    /// A tag reappeared away from its previous fragment.
    DuplicateTag(ConceptTag),
    /// The de-tagged body reads back as different text than the markup.
    ProjectionMismatch,
}

/// Structured decoding error for one malformed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeIssue {
    /// Raw offset of the `<Concept>` that started the region.
    pub offset: RawOffset,
    pub kind: DecodeIssueKind,
}

impl Display for DecodeIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DecodeIssueKind::MissingInnerTag => {
                write!(f, "concept at {} has no inner tag", self.offset)
            }
            DecodeIssueKind::MismatchedClose => {
                write!(f, "concept at {} has mismatched closing tags", self.offset)
            }
            DecodeIssueKind::NestedConcept => {
                write!(f, "concept at {} contains a nested concept", self.offset)
            }
            DecodeIssueKind::Unterminated => {
                write!(f, "concept at {} is never closed", self.offset)
            }
            DecodeIssueKind::DuplicateTag(tag) => {
                write!(f, "concept at {} repeats tag `{tag}`", self.offset)
            }
            DecodeIssueKind::ProjectionMismatch => write!(
                f,
                "removing the concept at {} changes the document text",
                self.offset
            ),
        }
    }
}

impl Error for DecodeIssue {}

/// Output of [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDocument {
    /// Markup with every well-formed concept wrapper replaced by its inner text.
    pub body: String,
    /// Logical-text projection shared by extraction and mapping.
    pub logical_text: String,
    /// Annotations in document order.
    pub annotations: Vec<Annotation>,
    pub issues: Vec<DecodeIssue>,
}

/// One well-formed wrapper found in the collect pass.
#[derive(Debug)]
struct ConceptMatch {
    tag: ConceptTag,
    /// Byte range of the whole wrapper.
    outer: Range<usize>,
    /// Byte range of the inner markup.
    inner: Range<usize>,
    from: LogicalOffset,
    text: String,
}

/// Decodes persisted markup into a de-tagged body and annotations.
pub fn decode(markup: &str) -> DecodedDocument {
    let lexemes: Vec<Lexeme<'_>> = Lexer::new(markup).collect();
    let logical_starts = logical_starts(&lexemes);

    let mut matches = Vec::new();
    let mut issues = Vec::new();
    let mut index = 0;
    while index < lexemes.len() {
        if !is_concept_open(&lexemes[index]) {
            index += 1;
            continue;
        }

        match match_concept(&lexemes, index) {
            Ok((tag, inner, end)) => {
                let text: String = lexemes[inner.clone()]
                    .iter()
                    .filter_map(|lexeme| lexeme.logical_text())
                    .collect();
                matches.push(ConceptMatch {
                    tag,
                    outer: lexemes[index].bytes.0..lexemes[end].bytes.1,
                    inner: byte_span(&lexemes, inner),
                    from: logical_starts[index],
                    text,
                });
                index = end + 1;
            }
            Err(kind) => {
                issues.push(DecodeIssue {
                    offset: lexemes[index].raw,
                    kind,
                });
                index += 1;
            }
        }
    }

    let annotations = collect_annotations(&lexemes, &matches, &mut issues);
    let body = replace_matches(markup, &matches);
    let logical_text: String = lexemes
        .iter()
        .filter_map(|lexeme| lexeme.logical_text())
        .collect();
    if let Some(offset) = projection_mismatch(&body, &logical_text, &lexemes, &matches) {
        issues.push(DecodeIssue {
            offset,
            kind: DecodeIssueKind::ProjectionMismatch,
        });
    }

    for issue in &issues {
        warn!("event=concept_decode module=codec status=skipped issue=\"{issue}\"");
    }
    debug!(
        "event=concept_decode module=codec status=ok annotations={} issues={}",
        annotations.len(),
        issues.len()
    );

    DecodedDocument {
        body,
        logical_text,
        annotations,
        issues,
    }
}

/// Logical offset at the start of every lexeme.
fn logical_starts(lexemes: &[Lexeme<'_>]) -> Vec<LogicalOffset> {
    let mut cursor = LogicalOffset::ZERO;
    lexemes
        .iter()
        .map(|lexeme| {
            let start = cursor;
            if let Some(text) = lexeme.logical_text() {
                cursor = cursor.advance(&text);
            }
            start
        })
        .collect()
}

fn is_concept_open(lexeme: &Lexeme<'_>) -> bool {
    lexeme
        .tag()
        .is_some_and(|tag| tag.kind == TagKind::Open && tag.name == CONCEPT_ELEMENT)
}

/// Matches one wrapper starting at `start`.
///
/// Returns the tag, the lexeme range of the inner content and the index of
/// the closing `</Concept>`.
fn match_concept(
    lexemes: &[Lexeme<'_>],
    start: usize,
) -> Result<(ConceptTag, Range<usize>, usize), DecodeIssueKind> {
    let open_index = start + 1;
    let open = lexemes
        .get(open_index)
        .ok_or(DecodeIssueKind::Unterminated)?;
    let tag = open
        .tag()
        .filter(|tag| tag.kind == TagKind::Open && !tag.has_attributes())
        .and_then(|tag| ConceptTag::parse(tag.name).ok())
        .ok_or(DecodeIssueKind::MissingInnerTag)?;

    let inner_start = open_index + 1;
    for (index, lexeme) in lexemes.iter().enumerate().skip(inner_start) {
        let Some(current) = lexeme.tag() else {
            continue;
        };
        if is_concept_open(lexeme) {
            return Err(DecodeIssueKind::NestedConcept);
        }
        if current.closes(CONCEPT_ELEMENT) {
            return Err(DecodeIssueKind::MismatchedClose);
        }
        if current.closes(tag.as_str()) {
            return match lexemes.get(index + 1).and_then(Lexeme::tag) {
                Some(next) if next.closes(CONCEPT_ELEMENT) => {
                    Ok((tag, inner_start..index, index + 1))
                }
                Some(_) => Err(DecodeIssueKind::MismatchedClose),
                None => Err(DecodeIssueKind::Unterminated),
            };
        }
    }
    Err(DecodeIssueKind::Unterminated)
}

/// Byte range covered by a lexeme range; empty ranges sit at the next lexeme.
fn byte_span(lexemes: &[Lexeme<'_>], range: Range<usize>) -> Range<usize> {
    let start = lexemes[range.start].bytes.0;
    let end = if range.is_empty() {
        start
    } else {
        lexemes[range.end - 1].bytes.1
    };
    start..end
}

/// Turns matches into annotations, merging contiguous fragments of one tag.
fn collect_annotations(
    lexemes: &[Lexeme<'_>],
    matches: &[ConceptMatch],
    issues: &mut Vec<DecodeIssue>,
) -> Vec<Annotation> {
    let mut annotations: Vec<Annotation> = Vec::with_capacity(matches.len());
    let mut by_tag: HashMap<ConceptTag, usize> = HashMap::new();

    for found in matches {
        let to = found.from.advance(&found.text);
        match by_tag.get(&found.tag) {
            Some(&existing) if annotations[existing].to == found.from => {
                let annotation = &mut annotations[existing];
                annotation.text.push_str(&found.text);
                annotation.to = to;
            }
            Some(_) => issues.push(DecodeIssue {
                offset: raw_offset_of(lexemes, found.outer.start),
                kind: DecodeIssueKind::DuplicateTag(found.tag.clone()),
            }),
            None => {
                by_tag.insert(found.tag.clone(), annotations.len());
                annotations.push(Annotation::new(
                    found.tag.clone(),
                    found.text.clone(),
                    found.from,
                    to,
                ));
            }
        }
    }
    annotations
}

fn raw_offset_of(lexemes: &[Lexeme<'_>], byte: usize) -> RawOffset {
    lexemes
        .iter()
        .find(|lexeme| lexeme.bytes.0 == byte)
        .map_or(RawOffset::default(), |lexeme| lexeme.raw)
}

/// Raw offset of the wrapper nearest the first char where `body` stops
/// projecting to `logical_text`, or `None` when the two agree.
fn projection_mismatch(
    body: &str,
    logical_text: &str,
    lexemes: &[Lexeme<'_>],
    matches: &[ConceptMatch],
) -> Option<RawOffset> {
    let projected = project_logical_text(body);
    if projected == logical_text {
        return None;
    }
    let diverged_at = projected
        .chars()
        .zip(logical_text.chars())
        .take_while(|(left, right)| left == right)
        .count();
    let culprit = matches
        .iter()
        .find(|found| found.from.get() >= diverged_at)
        .or(matches.last());
    Some(culprit.map_or(RawOffset::default(), |found| {
        raw_offset_of(lexemes, found.outer.start)
    }))
}

/// Builds the de-tagged body: every match replaced by its inner markup.
fn replace_matches(markup: &str, matches: &[ConceptMatch]) -> String {
    let mut body = String::with_capacity(markup.len());
    let mut copied = 0;
    for found in matches {
        body.push_str(&markup[copied..found.outer.start]);
        body.push_str(&markup[found.inner.clone()]);
        copied = found.outer.end;
    }
    body.push_str(&markup[copied..]);
    body
}

#[cfg(test)]
mod tests {
    use super::{decode, DecodeIssueKind};
    use crate::codec::offset::{LogicalOffset, RawOffset};
use crate::codec::projector::project_logical_text;

    #[test]
    fn extracts_offsets_in_logical_space() {
        let decoded = decode("A <Concept><t1>B</t1></Concept> C");
        assert_eq!(decoded.body, "A B C");
        assert_eq!(decoded.logical_text, "A B C");
        assert_eq!(decoded.annotations.len(), 1);
        let annotation = &decoded.annotations[0];
        assert_eq!(annotation.tag.as_str(), "t1");
        assert_eq!(annotation.text, "B");
        assert_eq!(annotation.from, LogicalOffset(2));
        assert_eq!(annotation.to, LogicalOffset(3));
        assert_eq!(annotation.explanation, None);
    }

    #[test]
    fn offsets_ignore_surrounding_generic_markup() {
        let decoded = decode(
            "<h1>Title</h1><p>Some <Concept><a1>alpha</a1></Concept> and <Concept><b2>beta</b2></Concept></p>",
        );
        assert_eq!(decoded.body, "<h1>Title</h1><p>Some alpha and beta</p>");
        let ranges: Vec<_> = decoded
            .annotations
            .iter()
            .map(|annotation| (annotation.from.get(), annotation.to.get()))
            .collect();
        assert_eq!(ranges, vec![(10, 15), (20, 24)]);
        assert_eq!(&decoded.logical_text[10..15], "alpha");
    }

    #[test]
    fn mismatched_closing_tag_is_reported_and_left_verbatim() {
        let decoded = decode("x <Concept><t1>B</Concept> y");
        assert!(decoded.annotations.is_empty());
        assert_eq!(decoded.body, "x <Concept><t1>B</Concept> y");
        assert_eq!(decoded.issues.len(), 1);
        assert_eq!(decoded.issues[0].offset, RawOffset(2));
        assert_eq!(decoded.issues[0].kind, DecodeIssueKind::MismatchedClose);
    }

    #[test]
    fn backreference_must_match() {
        let decoded = decode("<Concept><t1>B</t2></Concept>");
        assert!(decoded.annotations.is_empty());
        assert_eq!(decoded.issues[0].kind, DecodeIssueKind::MismatchedClose);
    }

    #[test]
    fn missing_inner_tag_and_unterminated_are_reported() {
        let decoded = decode("<Concept>plain</Concept> and <Concept><t9>open");
        let kinds: Vec<_> = decoded.issues.iter().map(|issue| issue.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![DecodeIssueKind::MissingInnerTag, DecodeIssueKind::Unterminated]
        );
        assert!(decoded.annotations.is_empty());
    }

    #[test]
    fn inner_tag_with_attributes_is_not_a_concept() {
        let decoded = decode("<Concept><t1 x=\"y\">B</t1></Concept>");
        assert!(decoded.annotations.is_empty());
        assert_eq!(decoded.issues[0].kind, DecodeIssueKind::MissingInnerTag);
    }

    #[test]
    fn nested_outer_is_rejected_but_inner_wrapper_survives() {
        let decoded = decode("<Concept><t1>A <Concept><t2>B</t2></Concept></t1></Concept>");
        assert_eq!(decoded.issues[0].kind, DecodeIssueKind::NestedConcept);
        assert_eq!(decoded.annotations.len(), 1);
        let inner = &decoded.annotations[0];
        assert_eq!(inner.tag.as_str(), "t2");
        assert_eq!(inner.text, "B");
        assert_eq!(inner.from, LogicalOffset(2));
        assert_eq!(decoded.body, "<Concept><t1>A B</t1></Concept>");
    }

    #[test]
    fn malformed_region_does_not_swallow_following_concept() {
        let decoded = decode("<Concept><t1>B</Concept> <Concept><t2>C</t2></Concept>");
        assert_eq!(decoded.annotations.len(), 1);
        assert_eq!(decoded.annotations[0].tag.as_str(), "t2");
        assert_eq!(decoded.annotations[0].from, LogicalOffset(2));
    }

    #[test]
    fn zero_length_concept_is_extracted() {
        let decoded = decode("ab<Concept><z1></z1></Concept>cd");
        assert_eq!(decoded.body, "abcd");
        let annotation = &decoded.annotations[0];
        assert!(annotation.is_empty());
        assert_eq!(annotation.from, LogicalOffset(2));
        assert_eq!(annotation.text, "");
    }

    #[test]
    fn inner_generic_markup_is_kept_and_projected() {
        let decoded = decode("<Concept><t1>a <strong>b</strong></t1></Concept>!");
        assert_eq!(decoded.body, "a <strong>b</strong>!");
        assert_eq!(decoded.annotations[0].text, "a b");
        assert_eq!(decoded.annotations[0].to, LogicalOffset(3));
    }

    #[test]
    fn contiguous_fragments_of_one_tag_merge() {
        let decoded = decode(
            "<p>x <Concept><t1>ab</t1></Concept></p><p><Concept><t1>cd</t1></Concept> y</p>",
        );
        assert!(decoded.issues.is_empty());
        assert_eq!(decoded.annotations.len(), 1);
        let annotation = &decoded.annotations[0];
        assert_eq!(annotation.text, "abcd");
        assert_eq!(annotation.from, LogicalOffset(2));
        assert_eq!(annotation.to, LogicalOffset(6));
    }

    #[test]
    fn separated_duplicate_tag_is_reported() {
        let decoded = decode("<Concept><t1>a</t1></Concept> gap <Concept><t1>b</t1></Concept>");
        assert_eq!(decoded.annotations.len(), 1);
        assert_eq!(decoded.annotations[0].text, "a");
        assert_eq!(decoded.issues.len(), 1);
        assert_eq!(decoded.issues[0].offset, RawOffset(34));
        assert!(matches!(
            decoded.issues[0].kind,
            DecodeIssueKind::DuplicateTag(_)
        ));
        assert_eq!(decoded.body, "a gap b");
    }

    #[test]
    fn character_references_count_as_one_char() {
        let decoded = decode("a &lt; <Concept><t1>b&amp;c</t1></Concept>");
        assert_eq!(decoded.logical_text, "a < b&c");
        let annotation = &decoded.annotations[0];
        assert_eq!(annotation.text, "b&c");
        assert_eq!(annotation.from, LogicalOffset(4));
        assert_eq!(annotation.to, LogicalOffset(7));
        assert!(decoded.issues.is_empty());
    }

    #[test]
    fn wrapper_removal_that_forms_a_tag_is_reported() {
        let decoded = decode("<p>if a <<Concept><t1>b</t1></Concept> then c >d</p>");
        assert_eq!(decoded.logical_text, "if a <b then c >d");
        assert_eq!(decoded.issues.len(), 1);
        assert_eq!(decoded.issues[0].kind, DecodeIssueKind::ProjectionMismatch);
        assert_eq!(decoded.issues[0].offset, RawOffset(9));
    }
}
