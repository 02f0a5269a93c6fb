//! Tree marks back to persisted concept markup.
//!
//! # Responsibility
//! - Render the tree through its own generic serializer.
//! - Rewrite every wrapper of a stored tag to `<Concept><TAG>..</TAG></Concept>`.
//! - Report stored tags with no wrapper left in the rendering.
//!
//! # Invariants
//! - Wrappers are matched by exact attribute value, never by prefix, and the
//!   inner content is carried through byte for byte.
//! - Substitution is idempotent: its output holds no wrapper of a stored tag.
//! - Wrappers of unknown tags and tag-less placeholders stay generic markup.

use crate::codec::markup::{Lexer, TagKind};
use crate::codec::tree::ConceptTree;
use crate::model::annotation::{ConceptTag, CONCEPT_ELEMENT};
use crate::model::doc_tree::CONCEPT_TAG_ATTRIBUTE;
use crate::store::AnnotationStore;
use log::{debug, warn};
use std::collections::HashSet;

/// Persistable markup plus the stored tags it no longer contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    pub markup: String,
    /// Store tags with no wrapper in the rendering, in store order.
    pub missing: Vec<ConceptTag>,
}

/// Renders `tree` and rewrites its concept wrappers for persistence.
pub fn encode<T: ConceptTree>(tree: &T, store: &AnnotationStore) -> EncodedDocument {
    let encoded = substitute_concepts(&tree.render_html(), store);
    for tag in &encoded.missing {
        warn!("event=concept_encode module=codec status=missing tag={tag}");
    }
    debug!(
        "event=concept_encode module=codec status=ok annotations={} missing={}",
        store.len(),
        encoded.missing.len()
    );
    encoded
}

/// Rewrites generic concept wrappers in `rendered` for every stored tag.
///
/// Every occurrence is rewritten, so a mark split across leaves persists as
/// adjacent fragments that extraction merges back.
pub fn substitute_concepts(rendered: &str, store: &AnnotationStore) -> EncodedDocument {
    let mut markup = String::with_capacity(rendered.len());
    let mut found: HashSet<ConceptTag> = HashSet::new();
    // One entry per open span; `Some` when its open tag was rewritten.
    let mut spans: Vec<Option<ConceptTag>> = Vec::new();

    for lexeme in Lexer::new(rendered) {
        let Some(tag) = lexeme.tag() else {
            markup.push_str(lexeme.source);
            continue;
        };
        if !tag.name.eq_ignore_ascii_case("span") {
            markup.push_str(lexeme.source);
            continue;
        }
        match tag.kind {
            TagKind::Open => {
                let concept = tag
                    .attribute(CONCEPT_TAG_ATTRIBUTE)
                    .and_then(|value| ConceptTag::parse(value).ok())
                    .filter(|concept| store.contains(concept));
                match &concept {
                    Some(concept) => {
                        push_concept_open(&mut markup, concept);
                        found.insert(concept.clone());
                    }
                    None => markup.push_str(lexeme.source),
                }
                spans.push(concept);
            }
            TagKind::Close => match spans.pop() {
                Some(Some(concept)) => push_concept_close(&mut markup, &concept),
                _ => markup.push_str(lexeme.source),
            },
            TagKind::SelfClosing | TagKind::Other => markup.push_str(lexeme.source),
        }
    }
    while let Some(open) = spans.pop() {
        if let Some(concept) = open {
            push_concept_close(&mut markup, &concept);
        }
    }

    let missing = store
        .tags()
        .filter(|tag| !found.contains(*tag))
        .cloned()
        .collect();
    EncodedDocument { markup, missing }
}

fn push_concept_open(out: &mut String, tag: &ConceptTag) {
    out.push('<');
    out.push_str(CONCEPT_ELEMENT);
    out.push_str("><");
    out.push_str(tag.as_str());
    out.push('>');
}

fn push_concept_close(out: &mut String, tag: &ConceptTag) {
    out.push_str("</");
    out.push_str(tag.as_str());
    out.push_str("></");
    out.push_str(CONCEPT_ELEMENT);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::{encode, substitute_concepts};
    use crate::codec::offset::LogicalOffset;
    use crate::model::annotation::{Annotation, ConceptTag};
    use crate::model::doc_tree::DocTree;
    use crate::store::AnnotationStore;

    fn tag(value: &str) -> ConceptTag {
        ConceptTag::parse(value).unwrap()
    }

    fn store_with(tags: &[&str]) -> AnnotationStore {
        let mut store = AnnotationStore::new();
        for value in tags {
            store
                .insert(Annotation::new(
                    tag(value),
                    "",
                    LogicalOffset(0),
                    LogicalOffset(0),
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn rewrites_wrapper_and_keeps_inner_markup() {
        let rendered =
            "<p>A <span class=\"concept-mark\" data-concept-tag=\"t1\"><strong>B</strong></span> C</p>";
        let encoded = substitute_concepts(rendered, &store_with(&["t1"]));
        assert_eq!(
            encoded.markup,
            "<p>A <Concept><t1><strong>B</strong></t1></Concept> C</p>"
        );
        assert!(encoded.missing.is_empty());
    }

    #[test]
    fn tag_prefixes_do_not_match() {
        let rendered = "<span data-concept-tag=\"t10\">x</span><span data-concept-tag=\"t1\">y</span>";
        let encoded = substitute_concepts(rendered, &store_with(&["t1"]));
        assert_eq!(
            encoded.markup,
            "<span data-concept-tag=\"t10\">x</span><Concept><t1>y</t1></Concept>"
        );
    }

    #[test]
    fn placeholders_and_plain_spans_are_left_alone() {
        let rendered = "<span class=\"concept-mark\">x</span><span>y</span>";
        let encoded = substitute_concepts(rendered, &store_with(&["t1"]));
        assert_eq!(encoded.markup, rendered);
        assert_eq!(encoded.missing, vec![tag("t1")]);
    }

    #[test]
    fn substitution_is_idempotent() {
        let store = store_with(&["t1", "t2"]);
        let rendered = "<p><span data-concept-tag=\"t1\">a</span> <span data-concept-tag=\"t2\"></span></p>";
        let once = substitute_concepts(rendered, &store);
        assert_eq!(
            once.markup,
            "<p><Concept><t1>a</t1></Concept> <Concept><t2></t2></Concept></p>"
        );
        let twice = substitute_concepts(&once.markup, &store);
        assert_eq!(twice.markup, once.markup);
    }

    #[test]
    fn every_fragment_of_a_tag_is_rewritten() {
        let rendered = "<p><span data-concept-tag=\"t1\">a</span></p><p><span data-concept-tag=\"t1\">b</span></p>";
        let encoded = substitute_concepts(rendered, &store_with(&["t1"]));
        assert_eq!(
            encoded.markup,
            "<p><Concept><t1>a</t1></Concept></p><p><Concept><t1>b</t1></Concept></p>"
        );
    }

    #[test]
    fn encode_renders_the_tree_first() {
        let tree = DocTree::parse("<p><span data-concept-tag=\"t1\">B</span></p>");
        let encoded = encode(&tree, &store_with(&["t1", "t2"]));
        assert_eq!(encoded.markup, "<p><Concept><t1>B</t1></Concept></p>");
        assert_eq!(encoded.missing, vec![tag("t2")]);
    }
}
