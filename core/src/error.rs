//! Error taxonomy. Each leaf type maps to one row of spec.md §7; `CoreError`
//! is the type that crosses into the HTTP layer (server crate converts it to
//! a status code).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(#[source] anyhow::Error),
    #[error("failed to spawn child: {0}")]
    Spawn(#[source] anyhow::Error),
    #[error("pty write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("pty resize failed: {0}")]
    Resize(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to create recording file {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write recording: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to (de)serialize metadata: {0}")]
    Metadata(#[source] serde_json::Error),
    #[error("recording {0} not found")]
    NotFound(uuid::Uuid),
    #[error("recording {0} is still active")]
    StillActive(uuid::Uuid),
    #[error("zip error: {0}")]
    Zip(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("git command failed: {0}")]
    Git(String),
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown assistant: {0}")]
    UnknownAssistant(String),
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error(transparent)]
    Pty(#[from] PtyError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
