//! Annotation store.
//!
//! # Responsibility
//! - Own the `tag -> Annotation` table for one open document.
//! - Preserve insertion order for serialization and concept listings.
//!
//! # Invariants
//! - Tags are unique; a second insert with a known tag is rejected and the
//!   first entry is left untouched.
//! - `index[tag]` is always the position of `tag` in `entries`.

use crate::model::annotation::{Annotation, AnnotationValidationError, ConceptTag};
use crate::model::explanation::StoredExplanation;
use log::debug;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store integrity errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    DuplicateTag(ConceptTag),
    Validation(AnnotationValidationError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTag(tag) => write!(f, "concept tag `{tag}` is already in the store"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DuplicateTag(_) => None,
            Self::Validation(err) => Some(err),
        }
    }
}

impl From<AnnotationValidationError> for StoreError {
    fn from(value: AnnotationValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Insertion-ordered annotation table keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    entries: Vec<Annotation>,
    index: HashMap<ConceptTag, usize>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a validated annotation.
    ///
    /// # Errors
    /// - `DuplicateTag` when the tag is already present.
    /// - `Validation` when `from > to`.
    pub fn insert(&mut self, annotation: Annotation) -> Result<(), StoreError> {
        annotation.validate()?;
        if self.index.contains_key(&annotation.tag) {
            return Err(StoreError::DuplicateTag(annotation.tag));
        }
        self.index.insert(annotation.tag.clone(), self.entries.len());
        self.entries.push(annotation);
        Ok(())
    }

    pub fn get(&self, tag: &ConceptTag) -> Option<&Annotation> {
        self.index.get(tag).map(|&position| &self.entries[position])
    }

    pub fn get_mut(&mut self, tag: &ConceptTag) -> Option<&mut Annotation> {
        self.index
            .get(tag)
            .copied()
            .map(move |position| &mut self.entries[position])
    }

    pub fn contains(&self, tag: &ConceptTag) -> bool {
        self.index.contains_key(tag)
    }

    /// Removes and returns the annotation for `tag`.
    pub fn remove(&mut self, tag: &ConceptTag) -> Option<Annotation> {
        let position = self.index.remove(tag)?;
        let removed = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Annotations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter()
    }

    pub fn tags(&self) -> impl Iterator<Item = &ConceptTag> {
        self.entries.iter().map(|annotation| &annotation.tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Joins stored explanations onto known annotations by tag.
    ///
    /// Returns how many annotations received an explanation; explanations
    /// for unknown tags are ignored.
    pub fn apply_explanations(&mut self, explanations: &[StoredExplanation]) -> usize {
        let mut merged = 0;
        for stored in explanations {
            if let Some(annotation) = self.get_mut(&stored.tag) {
                annotation.explanation = Some(stored.explanation.clone());
                merged += 1;
            }
        }
        debug!(
            "event=store_enrich module=store status=ok merged={merged} ignored={}",
            explanations.len() - merged
        );
        merged
    }

    /// Removes every listed tag; returns how many were present.
    pub fn prune(&mut self, tags: &[ConceptTag]) -> usize {
        let pruned = tags.iter().filter(|tag| self.remove(tag).is_some()).count();
        if pruned > 0 {
            debug!("event=store_prune module=store status=ok pruned={pruned}");
        }
        pruned
    }
}

impl<'a> IntoIterator for &'a AnnotationStore {
    type Item = &'a Annotation;
    type IntoIter = std::slice::Iter<'a, Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{AnnotationStore, StoreError};
    use crate::codec::offset::LogicalOffset;
    use crate::model::annotation::{Annotation, ConceptTag};
    use crate::model::explanation::StoredExplanation;

    fn tag(value: &str) -> ConceptTag {
        ConceptTag::parse(value).unwrap()
    }

    fn annotation(value: &str, from: usize, to: usize) -> Annotation {
        Annotation::new(tag(value), "x", LogicalOffset(from), LogicalOffset(to))
    }

    #[test]
    fn duplicate_tag_is_rejected_and_first_entry_kept() {
        let mut store = AnnotationStore::new();
        store
            .insert(annotation("t1", 0, 1).with_explanation("first"))
            .unwrap();
        let err = store.insert(annotation("t1", 4, 5)).unwrap_err();
        assert_eq!(err, StoreError::DuplicateTag(tag("t1")));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&tag("t1")).and_then(|a| a.explanation.as_deref()),
            Some("first")
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut store = AnnotationStore::new();
        assert!(matches!(
            store.insert(annotation("t1", 3, 1)),
            Err(StoreError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn iteration_keeps_insertion_order_across_removal() {
        let mut store = AnnotationStore::new();
        for value in ["c", "a", "b", "d"] {
            store.insert(annotation(value, 0, 0)).unwrap();
        }
        assert!(store.remove(&tag("a")).is_some());
        let tags: Vec<&str> = store.tags().map(ConceptTag::as_str).collect();
        assert_eq!(tags, vec!["c", "b", "d"]);
        assert_eq!(store.get(&tag("d")).map(|a| a.tag.as_str()), Some("d"));
        assert!(store.remove(&tag("a")).is_none());
    }

    #[test]
    fn explanations_join_by_tag() {
        let mut store = AnnotationStore::new();
        store.insert(annotation("t1", 0, 1)).unwrap();
        store.insert(annotation("t2", 1, 2)).unwrap();
        let merged = store.apply_explanations(&[
            StoredExplanation {
                tag: tag("t2"),
                concept: "x".to_string(),
                explanation: "why".to_string(),
            },
            StoredExplanation {
                tag: tag("gone"),
                concept: "y".to_string(),
                explanation: "orphan".to_string(),
            },
        ]);
        assert_eq!(merged, 1);
        assert_eq!(store.get(&tag("t1")).unwrap().explanation, None);
        assert_eq!(
            store.get(&tag("t2")).unwrap().explanation.as_deref(),
            Some("why")
        );
    }

    #[test]
    fn prune_counts_present_tags_only() {
        let mut store = AnnotationStore::new();
        store.insert(annotation("t1", 0, 1)).unwrap();
        store.insert(annotation("t2", 1, 2)).unwrap();
        assert_eq!(store.prune(&[tag("t1"), tag("zz")]), 1);
        assert!(!store.contains(&tag("t1")));
        assert!(store.contains(&tag("t2")));
    }
}
