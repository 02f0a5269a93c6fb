//! Annotation domain model.
//!
//! # Responsibility
//! - Define the concept tag identifier and the annotation record it keys.
//! - Validate tag syntax once, at construction.
//!
//! # Invariants
//! - A `ConceptTag` matches `[A-Za-z0-9_]+` and is never the reserved
//!   wrapper name `Concept`, so it is safe to interpolate into markup and
//!   into quoted attribute values.
//! - `from <= to` for every valid annotation; `from == to` is a legal
//!   zero-length placeholder.

use crate::codec::offset::LogicalOffset;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Element name of the persisted concept wrapper.
pub const CONCEPT_ELEMENT: &str = "Concept";

static CONCEPT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid concept tag regex"));

/// Why a string is not a usable concept tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptTagError {
    Empty,
    InvalidCharacters(String),
    Reserved(String),
}

impl Display for ConceptTagError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "concept tag must not be empty"),
            Self::InvalidCharacters(value) => {
                write!(f, "concept tag `{value}` must match [A-Za-z0-9_]+")
            }
            Self::Reserved(value) => write!(f, "concept tag `{value}` is reserved"),
        }
    }
}

impl Error for ConceptTagError {}

/// Opaque identifier joining markup, tree marks and store entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConceptTag(String);

impl ConceptTag {
    /// Validates and wraps `value`.
    pub fn parse(value: impl Into<String>) -> Result<Self, ConceptTagError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ConceptTagError::Empty);
        }
        if !CONCEPT_TAG_RE.is_match(&value) {
            return Err(ConceptTagError::InvalidCharacters(value));
        }
        if value == CONCEPT_ELEMENT {
            return Err(ConceptTagError::Reserved(value));
        }
        Ok(Self(value))
    }

    /// Mints a fresh tag from a v4 UUID (32 lowercase hex chars).
    ///
    /// Only used where no server-issued tag is available.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConceptTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConceptTag {
    type Error = ConceptTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ConceptTag> for String {
    fn from(value: ConceptTag) -> Self {
        value.0
    }
}

/// Annotation validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationValidationError {
    InvertedRange {
        tag: ConceptTag,
        from: LogicalOffset,
        to: LogicalOffset,
    },
}

impl Display for AnnotationValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvertedRange { tag, from, to } => {
                write!(f, "annotation `{tag}` has from {from} after to {to}")
            }
        }
    }
}

impl Error for AnnotationValidationError {}

/// In-memory record of one annotated span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub tag: ConceptTag,
    /// Covered text at extraction time. Informational; never re-derived.
    pub text: String,
    /// `None` until fetched or generated; `Some("")` is explicitly empty.
    pub explanation: Option<String>,
    pub from: LogicalOffset,
    pub to: LogicalOffset,
}

impl Annotation {
    /// Creates an annotation without an explanation.
    pub fn new(
        tag: ConceptTag,
        text: impl Into<String>,
        from: LogicalOffset,
        to: LogicalOffset,
    ) -> Self {
        Self {
            tag,
            text: text.into(),
            explanation: None,
            from,
            to,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Checks the range invariant.
    pub fn validate(&self) -> Result<(), AnnotationValidationError> {
        if self.from > self.to {
            return Err(AnnotationValidationError::InvertedRange {
                tag: self.tag.clone(),
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }

    /// Length of the covered range in logical chars.
    pub fn len(&self) -> usize {
        self.to.distance_from(self.from).unwrap_or(0)
    }

    /// Whether this is a zero-length placeholder.
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Whether a non-empty explanation is available to show.
    pub fn has_explanation(&self) -> bool {
        self.explanation
            .as_deref()
            .is_some_and(|value| !value.is_empty())
    }
}
