//! Repository layer: collaborator contracts and their SQLite implementation.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `InvalidRequest`)
//!   in addition to storage errors.

pub mod document_repo;
