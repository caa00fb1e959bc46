use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while extracting, consolidating, or transforming toll data.
#[derive(Debug, Error)]
pub enum PipelineError {
    // === Prerequisite Errors ===
    /// The source bundle is missing, corrupt, or did not yield the expected files.
    #[error("archive unavailable at {path}: {reason}")]
    ArchiveUnavailable { path: PathBuf, reason: String },

    // === Data Errors ===
    /// A source line does not match its declared schema.
    #[error("malformed record in {input} at line {line}: {reason}")]
    MalformedRecord {
        input: String,
        line: u64,
        reason: String,
    },

    // === Configuration Errors ===
    /// A configured field name is not part of the schema it is looked up in.
    #[error("unknown field '{field}' in schema '{schema}'")]
    UnknownField { field: String, schema: String },

    /// Two columns of a consolidated layout share a name.
    #[error("duplicate field '{field}' in consolidated layout")]
    DuplicateField { field: String },

    /// Configuration is structurally invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // === Transient Errors ===
    /// An artifact could not be read or written.
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stage exceeded its wall-clock budget and was abandoned.
    #[error("stage '{stage}' timed out after {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    // === Internal Errors ===
    /// A stage body panicked or its worker could not be joined.
    #[error("stage '{stage}' aborted: {message}")]
    StageAborted { stage: String, message: String },
}

/// Coarse classification used for retry decisions and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ArchiveUnavailable,
    MalformedRecord,
    UnknownField,
    InvalidConfig,
    IoFailure,
    StageTimeout,
    Internal,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArchiveUnavailable { .. } => ErrorKind::ArchiveUnavailable,
            Self::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            Self::UnknownField { .. } => ErrorKind::UnknownField,
            Self::DuplicateField { .. } | Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::StageTimeout { .. } => ErrorKind::StageTimeout,
            Self::StageAborted { .. } => ErrorKind::Internal,
        }
    }

    /// Only transient failures are worth another attempt; bad data stays bad.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::IoFailure | ErrorKind::StageTimeout)
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Classify a `csv` crate error: I/O stays I/O, anything else is bad data.
    pub(crate) fn from_csv(path: &Path, err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(source) => Self::io(path, source),
            other => Self::MalformedRecord {
                input: path.display().to_string(),
                line,
                reason: format!("{:?}", other),
            },
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
