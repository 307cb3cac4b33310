use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RefsketchError {
    #[error("invalid genome accession: {0}")]
    InvalidAccession(String),

    #[error("invalid taxonomic group label: {0:?}")]
    InvalidGroup(String),

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("taxonomy classification failed: {0}")]
    Classification(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("remote request failed: {0}")]
    RemoteHttp(String),

    #[error("remote returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("URL resolution gave up after {attempts} attempts: {last_error}")]
    ResolutionExhausted { attempts: u32, last_error: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("failed to install interrupt handler: {0}")]
    SignalHandler(String),
}

/// Failure talking to the remote archive.
///
/// `Transient` means the session itself is unusable (timeout, reset, server
/// error) and the caller should reconnect. The other variants are answers
/// about one path and leave the session healthy.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("remote returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("local write failed: {0}")]
    Local(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<RemoteError> for RefsketchError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Status { status, path } => RefsketchError::RemoteStatus {
                status,
                message: path,
            },
            RemoteError::Local(message) => RefsketchError::Filesystem(message),
            other => RefsketchError::RemoteHttp(other.to_string()),
        }
    }
}
