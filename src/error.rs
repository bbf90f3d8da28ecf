//! Error taxonomy for the sync engine.
//!
//! Per-document failures ([`ParseError`], validation issues, missing store
//! records, conflicts) are counted and never abort a run. [`StoreError`]s
//! split into transient failures, which are retried and then abort the run,
//! and per-record rejections, which are counted like any other document
//! failure.

use std::path::PathBuf;
use std::time::Duration;

/// A vault file could not be decoded into a complaint document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no metadata header found")]
    MissingHeader,
    #[error("metadata header is not terminated")]
    UnterminatedHeader,
    #[error("metadata header is not valid YAML: {0}")]
    InvalidHeader(String),
    #[error("metadata header must be a mapping")]
    HeaderNotMapping,
    #[error("metadata header has no classification group")]
    MissingGroup,
}

impl ParseError {
    /// Documents without a group are not complaints at all (index pages,
    /// templates, notes) and are ignored rather than reported as errors.
    pub fn is_not_a_complaint(&self) -> bool {
        matches!(self, ParseError::MissingGroup)
    }
}

/// Failure talking to the relational store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store rejected the write: {0}")]
    Rejected(String),
    #[error("side-table data does not match the schema: {0}")]
    Schema(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(message),
            sqlx::Error::RowNotFound => StoreError::NotFound(message),
            sqlx::Error::Database(db) if is_busy(db.message()) => StoreError::Unavailable(message),
            _ => StoreError::Rejected(message),
        }
    }
}

fn is_busy(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database is busy")
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Schema(err.to_string())
    }
}

/// Run-level failure of an orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("vault I/O error at {path}: {source}", path = path.display())]
    Vault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render document: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("vault walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid vault pattern: {0}")]
    Pattern(#[from] globset::Error),
}

impl SyncError {
    pub fn vault(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Vault {
            path: path.into(),
            source,
        }
    }

    /// Run failures worth retrying as a whole.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
