//! Errors surfaced by the mapping core.
//!
//! Every variant is fatal to the immediate caller. Batch callers that want to
//! keep going past individual misses check [`VcsMapError::is_miss`].

use std::path::PathBuf;

use crate::hash::{CommitHash, Scheme};

pub type Result<T> = std::result::Result<T, VcsMapError>;

#[derive(Debug, thiserror::Error)]
pub enum VcsMapError {
    #[error("failed to fetch mapping snapshot from {url}: {reason}")]
    SnapshotFetchFailed { url: String, reason: String },

    #[error("mapping snapshot archive has no member `{member}`")]
    SnapshotCorrupt { member: String },

    #[error("malformed mapping line {line} in {}: {content:?}", .path.display())]
    MappingFileMalformed {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Missing {scheme} commit in the VCS map: {hash} ({reason})")]
    HashNotFound {
        scheme: Scheme,
        hash: CommitHash,
        reason: String,
    },

    #[error("Missing {scheme} commit in the VCS map: {hash} (cache-only lookup)")]
    CacheOnlyMiss { scheme: Scheme, hash: CommitHash },

    #[error("unexpected answer from mapper service at {url}: {body:?}")]
    InvalidServiceResponse { url: String, body: String },

    #[error(
        "refusing to record {git} <-> {hg}: already mapped to {existing_git} <-> {existing_hg}"
    )]
    MappingConflict {
        git: CommitHash,
        hg: CommitHash,
        existing_git: CommitHash,
        existing_hg: CommitHash,
    },

    #[error("invalid commit hash {input:?}: {reason}")]
    InvalidHash { input: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VcsMapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for per-hash misses (`HashNotFound`, `CacheOnlyMiss`).
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            VcsMapError::HashNotFound { .. } | VcsMapError::CacheOnlyMiss { .. }
        )
    }
}
