use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GlmError {
    #[error("invalid date: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("start date {start} is after end date {end}")]
    #[diagnostic(help("pass an inclusive range with --start-date <= --end-date"))]
    InvalidDateRange { start: String, end: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("object store unreachable: {0}")]
    StoreUnreachable(String),

    #[error("record format not available in this build: {0}")]
    #[diagnostic(help("rebuild with `--features netcdf` or set \"format\": \"json\""))]
    UnsupportedFormat(String),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("object store request failed: {0}")]
    Transport(String),

    #[error("object store returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to stage {path}: {message}")]
    Staging { path: PathBuf, message: String },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("cannot concatenate window {window} of bucket {bucket}: {message}")]
    ConcatenationShape {
        bucket: String,
        window: usize,
        message: String,
    },

    #[error("failed to write artifact {path}: {message}")]
    ArtifactWrite { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<GlmError>,
    },
}

impl GlmError {
    /// Failures worth another attempt: network trouble, throttling, server
    /// errors and local write failures while staging a download.
    pub fn is_transient(&self) -> bool {
        match self {
            GlmError::Transport(_) | GlmError::Staging { .. } => true,
            GlmError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GlmError::InvalidDate(_)
                | GlmError::InvalidDateRange { .. }
                | GlmError::InvalidConfig(_)
                | GlmError::ConfigRead(_)
                | GlmError::ConfigParse(_)
                | GlmError::StoreUnreachable(_)
                | GlmError::UnsupportedFormat(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            GlmError::NotFound(_) => true,
            GlmError::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
