//! Domain model for concept annotations.
//!
//! # Responsibility
//! - Define annotation, tag and explanation records.
//! - Provide the reference document tree the codec marks.
//!
//! # Invariants
//! - Every annotation is identified by a validated `ConceptTag`.

pub mod annotation;
pub mod doc_tree;
pub mod explanation;
