//! Concept annotation codec.
//!
//! Decodes `<Concept><TAG>text</TAG></Concept>` markup into a de-tagged body
//! plus annotations, places them on a document tree as marks, and encodes
//! the marked tree back for persistence.

pub mod codec;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use codec::extractor::{decode, DecodeIssue, DecodeIssueKind, DecodedDocument};
pub use codec::mapper::{apply_annotation_marks, logical_offset_at, MappingReport, SkipReason};
pub use codec::offset::{LogicalOffset, RawOffset, TreeOffset};
pub use codec::projector::project_logical_text;
pub use codec::serializer::{encode, substitute_concepts, EncodedDocument};
pub use codec::tree::{ConceptTree, TextLeafRef};
pub use config::{CodecConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, init_logging_from_config, LoggingError};
pub use model::annotation::{Annotation, ConceptTag, ConceptTagError};
pub use model::doc_tree::DocTree;
pub use model::explanation::{
    DocumentId, ExplanationMode, GeneratedExplanation, StoredExplanation,
};
pub use repo::document_repo::{
    DocumentRepository, ExplanationGenerator, GenerationError, RepoError, RepoResult,
    SqliteDocumentRepository,
};
pub use service::concept_service::{
    AutosaveTimer, ConceptSession, ExplanationTicket, LoadReport, SaveGuard, SaveReport,
    SaveTicket, SessionError,
};
pub use store::{AnnotationStore, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
