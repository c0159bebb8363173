//! Mapper configuration: endpoints, local state paths and network limits.
//!
//! Layers (lowest priority first): [`MapperConfig::default`], a JSON file
//! ([`MapperConfig::from_json_file`]), then environment variables
//! ([`MapperConfig::apply_env`]). The CLI applies its own flags last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VcsMapError};

pub const DEFAULT_ARCHIVE_URL: &str =
    "https://moz-vcssync.s3-us-west-2.amazonaws.com/mapping/gecko-dev/git-mapfile.tar.bz2";
pub const DEFAULT_ARCHIVE_MEMBER: &str = "./build/conversion/beagle/.hg/git-mapfile";
pub const DEFAULT_SERVICE_BASE: &str = "https://mapper.mozilla-releng.net";
pub const DEFAULT_REPOSITORY: &str = "gecko-dev";
pub const DEFAULT_SNAPSHOT_PATH: &str = "vcs_map_full";
pub const DEFAULT_CACHE_PATH: &str = "vcs_map_cache";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 600;

pub const ENV_ARCHIVE_URL: &str = "VCSMAP_ARCHIVE_URL";
pub const ENV_SERVICE_URL: &str = "VCSMAP_SERVICE_URL";
pub const ENV_REPOSITORY: &str = "VCSMAP_REPOSITORY";
pub const ENV_SNAPSHOT: &str = "VCSMAP_SNAPSHOT";
pub const ENV_CACHE: &str = "VCSMAP_CACHE";
pub const ENV_TIMEOUT_SECS: &str = "VCSMAP_TIMEOUT_SECS";
pub const ENV_ARCHIVE_TIMEOUT_SECS: &str = "VCSMAP_ARCHIVE_TIMEOUT_SECS";

/// Configuration shared by the snapshot fetcher, the store and the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Bulk mapping archive (`.tar.bz2`)
    pub archive_url: String,
    /// Member of the archive holding the `<git> <hg>` table
    pub archive_member: String,
    /// Base URL of the mapper service
    pub service_base: String,
    /// Repository name on the mapper service
    pub repository: String,
    /// Local copy of the bulk mapping (its entity tag lives next to it)
    pub snapshot_path: PathBuf,
    /// Append-only cache of remotely resolved pairs
    pub cache_path: PathBuf,
    /// Per-request timeout for `HEAD`s and mapper service lookups
    pub timeout_secs: u64,
    /// Budget for downloading the whole bulk archive body
    pub archive_timeout_secs: u64,
    /// HTTP User-Agent
    pub user_agent: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            archive_member: DEFAULT_ARCHIVE_MEMBER.to_string(),
            service_base: DEFAULT_SERVICE_BASE.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            archive_timeout_secs: DEFAULT_ARCHIVE_TIMEOUT_SECS,
            user_agent: concat!("vcsmap/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl MapperConfig {
    /// Read a (possibly partial) JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VcsMapError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| VcsMapError::Config(format!("{}: {e}", path.display())))
    }

    /// Override fields from `VCSMAP_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var(ENV_ARCHIVE_URL) {
            self.archive_url = url;
        }
        if let Some(url) = var(ENV_SERVICE_URL) {
            self.service_base = url;
        }
        if let Some(repo) = var(ENV_REPOSITORY) {
            self.repository = repo;
        }
        if let Some(path) = var(ENV_SNAPSHOT) {
            self.snapshot_path = PathBuf::from(path);
        }
        if let Some(path) = var(ENV_CACHE) {
            self.cache_path = PathBuf::from(path);
        }
        if let Some(secs) = var(ENV_TIMEOUT_SECS) {
            self.timeout_secs = parse_secs(ENV_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = var(ENV_ARCHIVE_TIMEOUT_SECS) {
            self.archive_timeout_secs = parse_secs(ENV_ARCHIVE_TIMEOUT_SECS, &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive_url.trim().is_empty() {
            return Err(VcsMapError::Config("archive_url is empty".to_string()));
        }
        if self.archive_member.trim().is_empty() {
            return Err(VcsMapError::Config("archive_member is empty".to_string()));
        }
        if self.service_base.trim().is_empty() {
            return Err(VcsMapError::Config("service_base is empty".to_string()));
        }
        if self.repository.trim().is_empty() || self.repository.contains('/') {
            return Err(VcsMapError::Config(format!(
                "repository must be a single path segment, got {:?}",
                self.repository
            )));
        }
        if self.timeout_secs == 0 {
            return Err(VcsMapError::Config("timeout_secs must be > 0".to_string()));
        }
        if self.archive_timeout_secs == 0 {
            return Err(VcsMapError::Config(
                "archive_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Sidecar holding the entity tag of the archive the snapshot came from.
    pub fn etag_path(&self) -> PathBuf {
        etag_path_for(&self.snapshot_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| VcsMapError::Config(format!("{key} is not a number: {value:?}")))
}

/// `<snapshot>.etag`
pub fn etag_path_for(snapshot_path: &Path) -> PathBuf {
    let mut name = snapshot_path.as_os_str().to_owned();
    name.push(".etag");
    PathBuf::from(name)
}
