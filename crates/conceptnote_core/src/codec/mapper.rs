//! Logical-text offsets to tree marks.
//!
//! # Responsibility
//! - Translate each annotation's `[from, to)` into tree ranges, one per
//!   covered text leaf, and apply the concept mark there.
//! - Skip, report and log annotations that cannot be placed.
//!
//! # Invariants
//! - Every range is planned before any mark is applied, so mark application
//!   never shifts a position used by a later annotation.
//! - An annotation is marked only when the covered leaf text equals its
//!   stored `text`.

use crate::codec::offset::{slice_chars, LogicalOffset, TreeOffset};
use crate::codec::tree::{ConceptTree, TextLeafRef};
use crate::model::annotation::{Annotation, ConceptTag};
use log::{debug, warn};
use std::fmt::{Display, Formatter};
use std::ops::Range;

/// Why an annotation was not marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `to` lies past the end of the document text, or `from > to`.
    OutOfRange,
    /// The covered text no longer matches the annotation.
    Drifted,
    /// No text leaf covers the range.
    NoTextLeaf,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OutOfRange => "out_of_range",
            Self::Drifted => "drifted",
            Self::NoTextLeaf => "no_text_leaf",
        })
    }
}

/// Outcome of one mapping pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    /// Number of annotations marked.
    pub applied: usize,
    pub skipped: Vec<(ConceptTag, SkipReason)>,
}

/// Text leaf with its logical start.
struct LeafSpan<'a> {
    leaf: TextLeafRef<'a>,
    start: LogicalOffset,
    len: usize,
}

fn leaf_spans<'a>(leaves: Vec<TextLeafRef<'a>>) -> (Vec<LeafSpan<'a>>, LogicalOffset) {
    let mut cursor = LogicalOffset::ZERO;
    let spans = leaves
        .into_iter()
        .map(|leaf| {
            let len = leaf.text.chars().count();
            let span = LeafSpan {
                leaf,
                start: cursor,
                len,
            };
            cursor = cursor.add(len);
            span
        })
        .collect();
    (spans, cursor)
}

/// Applies one concept mark per annotation and resets the tree selection.
pub fn apply_annotation_marks<T: ConceptTree>(
    tree: &mut T,
    annotations: &[Annotation],
) -> MappingReport {
    let plans: Vec<Result<Vec<Range<TreeOffset>>, SkipReason>> = {
        let (spans, total) = leaf_spans(tree.text_leaves());
        annotations
            .iter()
            .map(|annotation| plan_ranges(&spans, total, annotation))
            .collect()
    };

    let mut report = MappingReport::default();
    for (annotation, plan) in annotations.iter().zip(plans) {
        match plan {
            Ok(ranges) => {
                for range in ranges {
                    tree.set_concept_mark(range, Some(&annotation.tag));
                }
                report.applied += 1;
            }
            Err(reason) => {
                warn!(
                    "event=concept_map module=codec status=skipped tag={} from={} to={} reason={reason}",
                    annotation.tag, annotation.from, annotation.to
                );
                report.skipped.push((annotation.tag.clone(), reason));
            }
        }
    }
    tree.reset_selection();

    debug!(
        "event=concept_map module=codec status=ok applied={} skipped={}",
        report.applied,
        report.skipped.len()
    );
    report
}

fn plan_ranges(
    spans: &[LeafSpan<'_>],
    total: LogicalOffset,
    annotation: &Annotation,
) -> Result<Vec<Range<TreeOffset>>, SkipReason> {
    let (from, to) = (annotation.from, annotation.to);
    if from > to || to > total {
        return Err(SkipReason::OutOfRange);
    }

    if annotation.is_empty() {
        return spans
            .iter()
            .find(|span| span.start <= from && from <= span.start.add(span.len))
            .and_then(|span| TreeOffset::from_leaf(span.leaf.pos, span.start, from))
            .map(|pos| vec![pos..pos])
            .ok_or(SkipReason::NoTextLeaf);
    }

    let mut ranges = Vec::new();
    let mut covered = String::new();
    for span in spans.iter().filter(|span| span.len > 0) {
        let end = span.start.add(span.len);
        let start = from.max(span.start);
        let stop = to.min(end);
        if start >= stop {
            continue;
        }
        let (Some(tree_start), Some(tree_stop)) = (
            TreeOffset::from_leaf(span.leaf.pos, span.start, start),
            TreeOffset::from_leaf(span.leaf.pos, span.start, stop),
        ) else {
            continue;
        };
        let local_start = tree_start.get() - span.leaf.pos.get();
        let local_stop = tree_stop.get() - span.leaf.pos.get();
        covered.push_str(slice_chars(span.leaf.text, local_start, local_stop));
        ranges.push(tree_start..tree_stop);
    }

    if ranges.is_empty() {
        return Err(SkipReason::NoTextLeaf);
    }
    if covered != annotation.text {
        return Err(SkipReason::Drifted);
    }
    Ok(ranges)
}

/// Logical offset of a tree position.
///
/// Positions on block boundaries snap forward to the next leaf. Returns
/// `None` past the end of the document content.
pub fn logical_offset_at<T: ConceptTree>(tree: &T, pos: TreeOffset) -> Option<LogicalOffset> {
    if pos > tree.content_size() {
        return None;
    }
    let (spans, total) = leaf_spans(tree.text_leaves());
    for span in &spans {
        if pos < span.leaf.pos {
            return Some(span.start);
        }
        if pos.get() <= span.leaf.pos.get() + span.len {
            return pos.to_logical(span.leaf.pos, span.start);
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::{apply_annotation_marks, logical_offset_at, SkipReason};
    use crate::codec::offset::{LogicalOffset, TreeOffset};
    use crate::codec::tree::ConceptTree;
    use crate::model::annotation::{Annotation, ConceptTag};
    use crate::model::doc_tree::DocTree;

    fn annotation(tag: &str, text: &str, from: usize, to: usize) -> Annotation {
        Annotation::new(
            ConceptTag::parse(tag).unwrap(),
            text,
            LogicalOffset(from),
            LogicalOffset(to),
        )
    }

    #[test]
    fn marks_land_in_the_right_paragraph() {
        let mut tree = DocTree::parse("<p>Hello world</p><p>Second line</p>");
        let report = apply_annotation_marks(&mut tree, &[annotation("t1", "world", 6, 11)]);
        assert_eq!(report.applied, 1);
        assert!(report.skipped.is_empty());
        assert_eq!(
            tree.concept_tag_at(TreeOffset(7)),
            Some(ConceptTag::parse("t1").unwrap())
        );
        for pos in 14..25 {
            assert_eq!(tree.concept_tag_at(TreeOffset(pos)), None);
        }
    }

    #[test]
    fn annotation_spanning_leaves_is_marked_per_leaf() {
        let mut tree = DocTree::parse("<p>ab</p><p>cd</p>").with_concept_class("");
        let report = apply_annotation_marks(&mut tree, &[annotation("t1", "bc", 1, 3)]);
        assert_eq!(report.applied, 1);
        assert_eq!(
            tree.render_html(),
            "<p>a<span data-concept-tag=\"t1\">b</span></p><p><span data-concept-tag=\"t1\">c</span>d</p>"
        );
    }

    #[test]
    fn stale_offsets_are_skipped() {
        let mut tree = DocTree::parse("<p>abc</p>");
        let report = apply_annotation_marks(
            &mut tree,
            &[annotation("t1", "abcd", 0, 4), annotation("t2", "xy", 0, 2)],
        );
        assert_eq!(report.applied, 0);
        assert_eq!(
            report.skipped,
            vec![
                (ConceptTag::parse("t1").unwrap(), SkipReason::OutOfRange),
                (ConceptTag::parse("t2").unwrap(), SkipReason::Drifted),
            ]
        );
        assert_eq!(tree.render_html(), "<p>abc</p>");
    }

    #[test]
    fn zero_length_annotation_does_not_disturb_neighbours() {
        let mut tree = DocTree::parse("<p>abcd</p>").with_concept_class("");
        let report = apply_annotation_marks(
            &mut tree,
            &[annotation("t1", "ab", 0, 2), annotation("z1", "", 2, 2)],
        );
        assert_eq!(report.applied, 2);
        assert_eq!(
            tree.render_html(),
            "<p><span data-concept-tag=\"t1\">ab</span><span data-concept-tag=\"z1\"></span>cd</p>"
        );
        assert_eq!(tree.plain_text(), "abcd");
    }

    #[test]
    fn empty_document_has_no_leaf_for_placeholders() {
        let mut tree = DocTree::parse("");
        let report = apply_annotation_marks(&mut tree, &[annotation("z1", "", 0, 0)]);
        assert_eq!(
            report.skipped,
            vec![(ConceptTag::parse("z1").unwrap(), SkipReason::NoTextLeaf)]
        );
    }

    #[test]
    fn selection_is_reset_after_mapping() {
        let mut tree = DocTree::parse("<p>abc</p>");
        tree.set_selection(TreeOffset(2)..TreeOffset(3));
        apply_annotation_marks(&mut tree, &[]);
        assert_eq!(tree.selection(), TreeOffset(0)..TreeOffset(0));
    }

    #[test]
    fn tree_positions_convert_back_to_logical_offsets() {
        let tree = DocTree::parse("<p>Hello world</p><p>Second line</p>");
        assert_eq!(logical_offset_at(&tree, TreeOffset(7)), Some(LogicalOffset(6)));
        assert_eq!(logical_offset_at(&tree, TreeOffset(13)), Some(LogicalOffset(11)));
        assert_eq!(logical_offset_at(&tree, TreeOffset(15)), Some(LogicalOffset(12)));
        assert_eq!(logical_offset_at(&tree, TreeOffset(26)), Some(LogicalOffset(22)));
        assert_eq!(logical_offset_at(&tree, TreeOffset(27)), None);
    }
}
