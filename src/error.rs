//! Error taxonomy for a relay session.
//!
//! Everything except [`CleanupError`] is fatal: the first one raised ends the
//! session and becomes its single `Error` progress event.

use std::io;
use std::path::PathBuf;

/// Input rejected before any work is started.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("No file uploaded.")]
    MissingFile,
    #[error("Invalid file type. Only video files are allowed.")]
    UnsupportedType(String),
    #[error("Invalid file name: {0}")]
    InvalidName(String),
    #[error("Video resolution too low: {width}x{height}")]
    ResolutionTooLow { width: u32, height: u32 },
    #[error("Failed to extract video resolution: {0}")]
    Probe(String),
}

/// Terminal failure of the external transcoding process.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to start transcoder: {0}")]
    Spawn(#[source] io::Error),
    #[error("transcoder exited with status {code}: {diagnostic}")]
    Failed { code: i32, diagnostic: String },
    #[error("transcoder terminated abnormally: {0}")]
    Crashed(String),
    #[error("transcoder produced no manifest in {0:?}")]
    MissingManifest(PathBuf),
}

/// Failure of a single `put` against the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected {path:?} with status {status}")]
    Rejected { path: PathBuf, status: u16 },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to upload segment {name} after {attempts} attempt(s): {source}")]
    Segment {
        name: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
    #[error("Failed to upload manifest after {attempts} attempt(s): {source}")]
    Manifest {
        attempts: u32,
        #[source]
        source: StorageError,
    },
    #[error("Manifest references segment {0} which was never uploaded")]
    UnconfirmedSegment(String),
    #[error("Manifest could not be read: {0}")]
    UnreadableManifest(#[source] io::Error),
    #[error("Transcoding finished but no manifest was produced")]
    MissingManifest,
}

/// Best-effort teardown failure. Logged, never surfaced to the caller.
#[derive(Debug, thiserror::Error)]
#[error("failed to remove {path:?}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Fatal outcome of a session.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("session cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
