//! Document and explanation collaborators, with a SQLite implementation.
//!
//! # Responsibility
//! - Define the four calls the session sequences around: load, fetch
//!   explanations, request an explanation, persist.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Tags are minted here, never by the session, so stored explanations and
//!   persisted markup share one tag namespace.
//! - Persisted markup is stored verbatim.
//! - Read paths reject invalid persisted rows instead of masking them.

use crate::db::DbError;
use crate::model::annotation::ConceptTag;
use crate::model::explanation::{
    DocumentId, ExplanationMode, GeneratedExplanation, StoredExplanation,
};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Failure reported by an explanation generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationError(pub String);

impl Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "explanation generation failed: {}", self.0)
    }
}

impl Error for GenerationError {}

/// Repository errors.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(DocumentId),
    InvalidRequest(String),
    InvalidData(String),
    Generation(GenerationError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "document not found: {id}"),
            Self::InvalidRequest(message) => write!(f, "invalid explanation request: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Generation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Generation(err) => Some(err),
            Self::NotFound(_) | Self::InvalidRequest(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<GenerationError> for RepoError {
    fn from(value: GenerationError) -> Self {
        Self::Generation(value)
    }
}

/// External calls a concept session depends on.
pub trait DocumentRepository {
    /// Last persisted markup, or `None` when the document does not exist.
    fn load_document(&self, id: &DocumentId) -> RepoResult<Option<String>>;

    /// Previously generated explanations for the document, oldest first.
    fn fetch_explanations(&self, id: &DocumentId) -> RepoResult<Vec<StoredExplanation>>;

    /// Generates an explanation for the `occurrence`-th (1-based) appearance
    /// of `text` and returns it with a freshly minted tag.
    fn request_explanation(
        &self,
        id: &DocumentId,
        text: &str,
        occurrence: u32,
        mode: ExplanationMode,
    ) -> RepoResult<GeneratedExplanation>;

    /// Stores `markup` verbatim, replacing any previous version.
    fn persist_document(&self, id: &DocumentId, markup: &str) -> RepoResult<()>;
}

/// Produces explanation text for a concept.
pub trait ExplanationGenerator {
    fn generate(
        &self,
        concept: &str,
        occurrence: u32,
        mode: ExplanationMode,
    ) -> Result<String, GenerationError>;
}

impl<F> ExplanationGenerator for F
where
    F: Fn(&str, u32, ExplanationMode) -> Result<String, GenerationError>,
{
    fn generate(
        &self,
        concept: &str,
        occurrence: u32,
        mode: ExplanationMode,
    ) -> Result<String, GenerationError> {
        self(concept, occurrence, mode)
    }
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository<'conn, G> {
    conn: &'conn Connection,
    generator: G,
}

impl<'conn, G: ExplanationGenerator> SqliteDocumentRepository<'conn, G> {
    pub fn new(conn: &'conn Connection, generator: G) -> Self {
        Self { conn, generator }
    }

    fn document_exists(&self, id: &DocumentId) -> RepoResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE user_id = ?1 AND filename = ?2;",
                params![id.user_id, id.filename],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl<G: ExplanationGenerator> DocumentRepository for SqliteDocumentRepository<'_, G> {
    fn load_document(&self, id: &DocumentId) -> RepoResult<Option<String>> {
        let markup = self
            .conn
            .query_row(
                "SELECT markup FROM documents WHERE user_id = ?1 AND filename = ?2;",
                params![id.user_id, id.filename],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(markup)
    }

    fn fetch_explanations(&self, id: &DocumentId) -> RepoResult<Vec<StoredExplanation>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag, concept, explanation
             FROM concept_explanations
             WHERE user_id = ?1 AND filename = ?2
             ORDER BY created_at ASC, rowid ASC;",
        )?;
        let mut rows = stmt.query(params![id.user_id, id.filename])?;
        let mut explanations = Vec::new();
        while let Some(row) = rows.next()? {
            explanations.push(parse_explanation_row(row)?);
        }
        Ok(explanations)
    }

    fn request_explanation(
        &self,
        id: &DocumentId,
        text: &str,
        occurrence: u32,
        mode: ExplanationMode,
    ) -> RepoResult<GeneratedExplanation> {
        if text.trim().is_empty() {
            return Err(RepoError::InvalidRequest("concept text is empty".to_string()));
        }
        if occurrence == 0 {
            return Err(RepoError::InvalidRequest("occurrence is 1-based".to_string()));
        }
        if !self.document_exists(id)? {
            return Err(RepoError::NotFound(id.clone()));
        }

        let explanation = match self.generator.generate(text, occurrence, mode) {
            Ok(explanation) => explanation,
            Err(err) => {
                error!(
                    "event=explanation_request module=repo status=error mode={} error=\"{err}\"",
                    mode.as_str()
                );
                return Err(err.into());
            }
        };
        let tag = ConceptTag::mint();
        self.conn.execute(
            "INSERT INTO concept_explanations (
                user_id,
                filename,
                tag,
                concept,
                occurrence,
                mode,
                explanation
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                id.user_id,
                id.filename,
                tag.as_str(),
                text,
                occurrence,
                mode.as_str(),
                explanation,
            ],
        )?;
        info!(
            "event=explanation_request module=repo status=ok tag={tag} mode={} occurrence={occurrence}",
            mode.as_str()
        );
        Ok(GeneratedExplanation { tag, explanation })
    }

    fn persist_document(&self, id: &DocumentId, markup: &str) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO documents (user_id, filename, markup)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, filename) DO UPDATE SET
                markup = excluded.markup,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![id.user_id, id.filename, markup],
        )?;
        info!(
            "event=document_persist module=repo status=ok bytes={}",
            markup.len()
        );
        Ok(())
    }
}

fn parse_explanation_row(row: &Row<'_>) -> RepoResult<StoredExplanation> {
    let raw_tag: String = row.get(0)?;
    let tag = ConceptTag::parse(raw_tag.as_str())
        .map_err(|err| RepoError::InvalidData(format!("explanation tag `{raw_tag}`: {err}")))?;
    Ok(StoredExplanation {
        tag,
        concept: row.get(1)?,
        explanation: row.get(2)?,
    })
}
