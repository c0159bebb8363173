//! Commit identifiers and the two naming schemes they live in.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VcsMapError};

/// Longest accepted hash (a full SHA-1 / Mercurial node id).
pub const MAX_HASH_LEN: usize = 40;

/// One of the two version-control naming schemes bridged by the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// The Git mirror (scheme A).
    Git,
    /// The Mercurial origin (scheme B).
    Hg,
}

impl Scheme {
    /// Path segment used by the remote mapper service (`/rev/<segment>/<hash>`).
    pub fn path_segment(self) -> &'static str {
        match self {
            Scheme::Git => "git",
            Scheme::Hg => "hg",
        }
    }

    pub fn other(self) -> Scheme {
        match self {
            Scheme::Git => Scheme::Hg,
            Scheme::Hg => Scheme::Git,
        }
    }

    /// Position of this scheme's hash in a mapper service answer (`<git> <hg>`).
    pub(crate) fn token_index(self) -> usize {
        match self {
            Scheme::Git => 0,
            Scheme::Hg => 1,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Git => f.write_str("git"),
            Scheme::Hg => f.write_str("mercurial"),
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = VcsMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(Scheme::Git),
            "hg" | "mercurial" => Ok(Scheme::Hg),
            other => Err(VcsMapError::Config(format!(
                "unknown scheme `{other}` (expected `git` or `hg`)"
            ))),
        }
    }
}

/// An opaque commit hash.
///
/// The scheme is carried by context: which index direction it is stored in,
/// or which resolver method it is handed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    /// Wrap a hash read from a trusted source (mapping files, service answers).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Validate user input: non-empty ASCII hex, at most 40 characters.
    ///
    /// The result is lowercased so that `DEADBEEF` and `deadbeef` hit the
    /// same index entry.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VcsMapError::InvalidHash {
                input: input.to_string(),
                reason: "empty hash".to_string(),
            });
        }
        if trimmed.len() > MAX_HASH_LEN {
            return Err(VcsMapError::InvalidHash {
                input: input.to_string(),
                reason: format!("longer than {MAX_HASH_LEN} characters"),
            });
        }
        if let Some(c) = trimmed.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(VcsMapError::InvalidHash {
                input: input.to_string(),
                reason: format!("non-hexadecimal character `{c}`"),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Equivalence between one Git commit and one Mercurial changeset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingPair {
    pub git: CommitHash,
    pub hg: CommitHash,
}

impl MappingPair {
    pub fn new(git: CommitHash, hg: CommitHash) -> Self {
        Self { git, hg }
    }

    /// The hash belonging to `scheme`.
    pub fn get(&self, scheme: Scheme) -> &CommitHash {
        match scheme {
            Scheme::Git => &self.git,
            Scheme::Hg => &self.hg,
        }
    }

    /// Line as stored in the snapshot and cache files (no trailing newline).
    pub fn to_line(&self) -> String {
        format!("{} {}", self.git, self.hg)
    }
}
