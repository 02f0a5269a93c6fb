//! Explanation and document identity records exchanged with storage.

use crate::model::annotation::ConceptTag;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies one persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    pub user_id: String,
    pub filename: String,
}

impl DocumentId {
    pub fn new(user_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            filename: filename.into(),
        }
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.filename)
    }
}

/// Explanation generation depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMode {
    #[default]
    Fast,
    Detailed,
}

impl ExplanationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Detailed => "detailed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(Self::Fast),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }
}

/// Previously generated explanation, joined to annotations by `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExplanation {
    pub tag: ConceptTag,
    /// Concept text the explanation was generated for.
    pub concept: String,
    pub explanation: String,
}

/// Freshly generated explanation with its server-issued tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedExplanation {
    pub tag: ConceptTag,
    pub explanation: String,
}
