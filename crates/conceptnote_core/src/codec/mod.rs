//! Concept annotation codec.
//!
//! # Responsibility
//! - Convert persisted concept markup into a de-tagged body plus annotations
//!   (`extractor`), and back (`serializer`).
//! - Place annotations on a document tree as marks (`mapper`).
//!
//! # Invariants
//! - Extraction and mapping share one logical-text space (`projector`),
//!   derived from one tokenizer (`markup`).
//! - The codec owns no document tree; it works through `tree::ConceptTree`.

pub mod extractor;
pub mod mapper;
pub mod markup;
pub mod offset;
pub mod projector;
pub mod serializer;
pub mod tree;
