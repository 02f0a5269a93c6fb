//! Codec configuration loaded from TOML.
//!
//! # Invariants
//! - A missing file is not an error; callers fall back to defaults.
//! - Every loaded config has passed `validate`.
//! - Documents persist in the database at `database_path`.

use crate::db::{open_db, DbResult};
use crate::model::doc_tree::DEFAULT_CONCEPT_CLASS;
use crate::model::explanation::ExplanationMode;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_DATABASE_PATH: &str = "conceptnote.sqlite3";

/// Config loading failures.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config at {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config at {}: {source}", path.display())
            }
            Self::Serialize(err) => write!(f, "failed to serialize config: {err}"),
            Self::Write { path, source } => {
                write!(f, "failed to write config at {}: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Serialize(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Runtime settings for logging, storage and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` disables file logs.
    pub log_dir: Option<PathBuf>,
    pub database_path: PathBuf,
    pub autosave_interval_secs: u64,
    pub explanation_mode: ExplanationMode,
    /// Class rendered on concept wrappers; empty renders none.
    pub concept_class: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            explanation_mode: ExplanationMode::default(),
            concept_class: DEFAULT_CONCEPT_CLASS.to_string(),
        }
    }
}

impl CodecConfig {
    /// Loads and validates the config at `path`; `Ok(None)` when absent.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Like `load_from_path`, falling back to defaults when absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::load_from_path(path)?.unwrap_or_default())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "autosave_interval_secs must be positive".to_string(),
            ));
        }
        let class_ok = self
            .concept_class
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '));
        if !class_ok {
            return Err(ConfigError::Invalid(format!(
                "concept_class `{}` may only hold letters, digits, `-`, `_` and spaces",
                self.concept_class
            )));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database_path must not be empty".to_string(),
            ));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be absolute, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    /// Opens (creating and migrating as needed) the configured database.
    pub fn open_database(&self) -> DbResult<Connection> {
        open_db(&self.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecConfig, ConfigError, DEFAULT_AUTOSAVE_INTERVAL_SECS};
    use crate::model::explanation::ExplanationMode;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_none_and_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        assert!(CodecConfig::load_from_path(&path).unwrap().is_none());

        let config = CodecConfig::load_or_default(&path).unwrap();
        assert_eq!(config.autosave_interval_secs, DEFAULT_AUTOSAVE_INTERVAL_SECS);
        assert_eq!(config.autosave_interval(), Duration::from_secs(120));
        assert_eq!(config.explanation_mode, ExplanationMode::Fast);
        assert_eq!(config.concept_class, "concept-mark");
    }

    #[test]
    fn partial_file_keeps_defaults_for_omitted_keys() {
        let config: CodecConfig =
            toml::from_str("explanation_mode = \"detailed\"\nautosave_interval_secs = 30\n")
                .unwrap();
        assert_eq!(config.explanation_mode, ExplanationMode::Detailed);
        assert_eq!(config.autosave_interval_secs, 30);
        assert_eq!(config.concept_class, "concept-mark");
    }

    #[test]
    fn save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        let config = CodecConfig {
            log_dir: Some(temp_dir.path().join("logs")),
            concept_class: String::new(),
            ..CodecConfig::default()
        };
        config.save_to_path(&path).unwrap();
        assert_eq!(CodecConfig::load_from_path(&path).unwrap(), Some(config));
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "autosave_interval_secs = 0\n").unwrap();
        assert!(matches!(
            CodecConfig::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "concept_class = \"a\\\"b\"\n").unwrap();
        assert!(matches!(
            CodecConfig::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "log_dir = \"relative/logs\"\n").unwrap();
        assert!(matches!(
            CodecConfig::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "database_path = \"\"\n").unwrap();
        assert!(matches!(
            CodecConfig::load_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn open_database_uses_configured_path() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("notes.sqlite3");
        std::fs::write(
            temp_dir.path().join("config.toml"),
            format!("database_path = {:?}\n", db_path.to_string_lossy()),
        )
        .unwrap();
        let config = CodecConfig::load_or_default(temp_dir.path().join("config.toml")).unwrap();
        assert_eq!(config.database_path, db_path);

        let conn = config.open_database().unwrap();
        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert!(version > 0);
        assert!(db_path.exists());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "autosave_interval_secs = \"soon\"\n").unwrap();
        assert!(matches!(
            CodecConfig::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
