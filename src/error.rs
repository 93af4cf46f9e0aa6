//! Error types for the video worker and playback orchestrator.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed with {error_count} error(s)")]
    ValidationFailed { error_count: usize },
}

/// Errors raised by the sqlite-backed stores and the content-addressed store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database '{path}': {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("Store task did not complete: {0}")]
    Blocking(String),
}

/// An attempted job status change that the state machine forbids.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Transcode pipeline failures. The display text becomes the job's error message.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Downloader produced no output. Check the url and try again later")]
    NoDownloadOutput,

    #[error("FFMPEG (Stage {stage}) exited with non 0 exit code {code}")]
    EncoderFailed { stage: u8, code: i32 },

    #[error("Failed to spawn '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    #[error("An exception occured while processing job. {0}")]
    Store(#[from] StoreError),

    #[error("An exception occured while processing job. {0}")]
    Transition(#[from] TransitionError),

    #[error("An exception occured while processing job. IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("An exception occured while processing job. Pipeline task aborted: {0}")]
    Aborted(String),
}

/// Failures talking to the worker service from the orchestrator.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid worker url '{0}'")]
    InvalidUrl(String),

    #[error("Worker has no artifact with hash {0}")]
    ArtifactNotFound(String),

    #[error("Downloaded artifact hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures preparing or starting playback.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to launch player '{program}': {message}")]
    LaunchFailed { program: String, message: String },

    #[error("No playable artifact for hash {0}")]
    MissingArtifact(String),

    #[error("Worker error: {0}")]
    Client(#[from] ClientError),

    #[error("Local cache error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<PlaybackError> for ApiError {
    fn from(error: PlaybackError) -> Self {
        match error {
            PlaybackError::MissingArtifact(_) => Self::NotFound(error.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Metrics registry errors.
#[derive(Error, Debug)]
#[error("Prometheus metrics setup failed: {0}")]
pub struct MetricsError(#[from] pub prometheus::Error);
