use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::vcs::PathRef;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("VCS command failed: {command}: {cause}")]
    VcsCommandFailed { command: String, cause: VcsFailure },

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Artifact unreadable: {}: {cause}", .path.display())]
    ArtifactUnreadable { path: PathBuf, cause: Unreadable },

    #[error("No last changing revision for '{0}', cannot judge freshness")]
    StaleEvidenceUnavailable(PathRef),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Why a VCS query did not produce a usable answer.
#[derive(Error, Debug)]
pub enum VcsFailure {
    #[error("exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not spawn: {0}")]
    Spawn(std::io::Error),

    #[error("libgit2: {0}")]
    Library(git2::Error),

    #[error("refusing revision '{0}'")]
    InvalidRevision(String),
}

#[derive(Error, Debug)]
pub enum Unreadable {
    #[error("not a readable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive contains no manifest")]
    NoManifest,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("malformed manifest: {0}")]
    Malformed(String),
}

impl Error {
    pub(crate) fn vcs(command: impl Into<String>, cause: VcsFailure) -> Self {
        Error::VcsCommandFailed {
            command: command.into(),
            cause,
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, cause: impl Into<Unreadable>) -> Self {
        Error::ArtifactUnreadable {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
