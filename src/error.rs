//! Error types for the MORT engine.

use std::path::PathBuf;

/// Errors surfaced by the engine.
///
/// Gate failures inside the validation pipeline are *not* errors; they are
/// reported as [`crate::types::ChunkOutcome::Discarded`]. Only conditions that
/// abort a run (or a single sandbox operation) live here.
#[derive(Debug, thiserror::Error)]
pub enum MortError {
    #[error("sandbox provisioning failed during {stage}: {message}")]
    SandboxProvision { stage: &'static str, message: String },

    #[error("master copy not created; call create_master_copy() first")]
    MasterMissing,

    #[error("{} is not inside repository {}", path.display(), repo.display())]
    OutsideRepository { path: PathBuf, repo: PathBuf },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chunking failed: {0}")]
    Chunking(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

impl MortError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn provision(stage: &'static str, message: impl Into<String>) -> Self {
        Self::SandboxProvision {
            stage,
            message: message.into(),
        }
    }

    /// True for errors that make every further validation impossible.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SandboxProvision { .. } | Self::MasterMissing)
    }
}

pub type Result<T> = std::result::Result<T, MortError>;
