//! Corpus session configuration.
//!
//! Loaded from a JSON file, then adjusted by `ANNOGRAPH_*` environment
//! variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ANNOGRAPH_CORPUS_NAME` | `corpus_name` |
//! | `ANNOGRAPH_HIERARCHY_DIR` | `hierarchy_dir` |
//! | `ANNOGRAPH_BATCH_SIZE` | `batch_size` |
//! | `ANNOGRAPH_MAX_PAUSE_SPAN` | `max_pause_span` |
//! | `ANNOGRAPH_DEBUG` | `debug` |
//! | `ANNOGRAPH_HTTP_URI`, `_USER`, `_PASSWORD`, `_DATABASE` | `backend` (`http` feature) |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which graph executor a corpus session talks to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory recording executor (no database).
    #[default]
    Recording,

    /// Neo4j transactional HTTP endpoint
    #[cfg(feature = "http")]
    Http {
        uri: String,
        user: String,
        password: String,
        database: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub corpus_name: String,
    pub backend: BackendConfig,
    /// Directory of hierarchy snapshots; kept in memory when unset.
    pub hierarchy_dir: Option<PathBuf>,
    /// Rows per import statement.
    pub batch_size: usize,
    /// Longest run of pause tokens a pause path may cross.
    pub max_pause_span: usize,
    pub word_type: String,
    pub phone_type: String,
    pub syllable_type: String,
    pub utterance_type: String,
    /// Log statements with parameters inlined.
    pub debug: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            corpus_name: "corpus".to_string(),
            backend: BackendConfig::Recording,
            hierarchy_dir: None,
            batch_size: 500,
            max_pause_span: 15,
            word_type: "word".to_string(),
            phone_type: "phone".to_string(),
            syllable_type: "syllable".to_string(),
            utterance_type: "utterance".to_string(),
            debug: false,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| Error::ParseError {
        source_name: name.to_string(),
        message: e.to_string(),
    })
}

impl CorpusConfig {
    pub fn new(corpus_name: impl Into<String>) -> Self {
        Self { corpus_name: corpus_name.into(), ..Default::default() }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| Error::ParseError {
            source_name: path.as_ref().display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any `ANNOGRAPH_*` lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("ANNOGRAPH_CORPUS_NAME") {
            self.corpus_name = v;
        }
        if let Some(v) = lookup("ANNOGRAPH_HIERARCHY_DIR") {
            self.hierarchy_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ANNOGRAPH_BATCH_SIZE") {
            self.batch_size = parse_var("ANNOGRAPH_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("ANNOGRAPH_MAX_PAUSE_SPAN") {
            self.max_pause_span = parse_var("ANNOGRAPH_MAX_PAUSE_SPAN", &v)?;
        }
        if let Some(v) = lookup("ANNOGRAPH_DEBUG") {
            self.debug = parse_var("ANNOGRAPH_DEBUG", &v)?;
        }
        #[cfg(feature = "http")]
        if let Some(uri) = lookup("ANNOGRAPH_HTTP_URI") {
            self.backend = BackendConfig::Http {
                uri,
                user: lookup("ANNOGRAPH_HTTP_USER").unwrap_or_else(|| "neo4j".to_string()),
                password: lookup("ANNOGRAPH_HTTP_PASSWORD").unwrap_or_default(),
                database: lookup("ANNOGRAPH_HTTP_DATABASE").unwrap_or_else(|| "neo4j".to_string()),
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.corpus_name.is_empty() {
            return Err(Error::ParseError {
                source_name: "config".to_string(),
                message: "corpus_name must not be empty".to_string(),
            });
        }
        if self.batch_size == 0 || self.max_pause_span == 0 {
            return Err(Error::ParseError {
                source_name: "config".to_string(),
                message: "batch_size and max_pause_span must be positive".to_string(),
            });
        }
        Ok(())
    }
}
