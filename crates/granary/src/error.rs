//! Error types for the ingestion engine

use granary_db::DbError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why metadata could not be extracted from a granule.
///
/// Any of these abandons the whole scene group; nothing is stored for it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("{path}: required attribute {attribute} is missing")]
    MissingAttribute { path: PathBuf, attribute: String },

    #[error("{path}: attribute {attribute} has invalid value '{value}': {reason}")]
    InvalidAttribute {
        path: PathBuf,
        attribute: String,
        value: String,
        reason: String,
    },
}

impl ExtractionError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Invalid product classification rules.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid pattern for '{kind}': {source}")]
    Pattern {
        kind: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule '{kind}' joins files by time token but its pattern has no (?P<token>...) group")]
    MissingToken { kind: String },

    #[error("Invalid product kind: {0}")]
    InvalidKind(#[from] DbError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Batch-level ingestion failures. Per-group problems never surface here;
/// they are recorded in the ingest report instead.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The store stopped answering; the batch was aborted.
    #[error("Catalog store unavailable: {0}")]
    StoreUnavailable(#[source] DbError),

    #[error("Catalog store error: {0}")]
    Store(#[from] DbError),

    #[error("Cannot enumerate {root}: {reason}")]
    Enumeration { root: PathBuf, reason: String },

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BuildError>;
