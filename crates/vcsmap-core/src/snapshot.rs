//! Bulk mapping snapshot: conditional download keyed on the archive's ETag.
//!
//! The snapshot file is replaced wholesale through a temporary file and a
//! rename, so a reader never sees a truncated table.

use bzip2::read::BzDecoder;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tar::Archive;
use tempfile::NamedTempFile;

use crate::config::{etag_path_for, MapperConfig};
use crate::error::{Result, VcsMapError};
use crate::http::Transport;

/// What [`SnapshotFetcher::ensure_snapshot`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Local snapshot matches the remote entity tag; nothing was downloaded.
    UpToDate { etag: String },
    /// The archive was downloaded and the snapshot replaced.
    Refreshed {
        etag: String,
        previous_etag: Option<String>,
        bytes: u64,
    },
}

pub struct SnapshotFetcher {
    transport: Arc<dyn Transport>,
    archive_url: String,
    archive_member: String,
    snapshot_path: PathBuf,
    etag_path: PathBuf,
    /// Budget for the archive body; `None` uses the transport default.
    archive_timeout: Option<Duration>,
}

impl SnapshotFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        archive_url: impl Into<String>,
        archive_member: impl Into<String>,
        snapshot_path: impl Into<PathBuf>,
    ) -> Self {
        let snapshot_path = snapshot_path.into();
        Self {
            transport,
            archive_url: archive_url.into(),
            archive_member: archive_member.into(),
            etag_path: etag_path_for(&snapshot_path),
            snapshot_path,
            archive_timeout: None,
        }
    }

    pub fn with_archive_timeout(mut self, timeout: Duration) -> Self {
        self.archive_timeout = Some(timeout);
        self
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &MapperConfig) -> Self {
        Self::new(
            transport,
            config.archive_url.clone(),
            config.archive_member.clone(),
            config.snapshot_path.clone(),
        )
        .with_archive_timeout(config.archive_timeout())
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn etag_path(&self) -> &Path {
        &self.etag_path
    }

    /// Make sure the local snapshot reflects the current remote archive.
    ///
    /// Always issues a `HEAD`; the body is only fetched when the entity tag
    /// changed or the snapshot file is missing. Failures are not retried.
    pub fn ensure_snapshot(&self) -> Result<SnapshotStatus> {
        let etag = self.remote_etag()?;
        let previous_etag = self.stored_etag()?;

        if previous_etag.as_deref() == Some(etag.as_str()) && self.snapshot_path.exists() {
            tracing::debug!(etag = %etag, "mapping snapshot is up to date");
            return Ok(SnapshotStatus::UpToDate { etag });
        }

        tracing::info!(
            url = %self.archive_url,
            old = ?previous_etag,
            new = %etag,
            "downloading mapping snapshot"
        );

        let resp = match self.archive_timeout {
            Some(timeout) => self.transport.get_with_timeout(&self.archive_url, timeout),
            None => self.transport.get(&self.archive_url),
        }
        .map_err(|e| self.fetch_failed(e.to_string()))?;
        if !resp.is_success() {
            return Err(self.fetch_failed(format!("GET returned status {}", resp.status)));
        }

        let bytes = extract_member(&resp.body, &self.archive_member, &self.snapshot_path)
            .map_err(|e| match e {
                ExtractError::Missing => VcsMapError::SnapshotCorrupt {
                    member: self.archive_member.clone(),
                },
                ExtractError::Archive(e) => self.fetch_failed(format!("unreadable archive: {e}")),
                ExtractError::Write(path, e) => VcsMapError::io(path, e),
            })?;

        write_atomic(&self.etag_path, etag.as_bytes())?;

        tracing::info!(
            path = %self.snapshot_path.display(),
            bytes,
            "mapping snapshot refreshed"
        );
        Ok(SnapshotStatus::Refreshed {
            etag,
            previous_etag,
            bytes,
        })
    }

    fn remote_etag(&self) -> Result<String> {
        let resp = self
            .transport
            .head(&self.archive_url)
            .map_err(|e| self.fetch_failed(e.to_string()))?;
        if !resp.is_success() {
            return Err(self.fetch_failed(format!("HEAD returned status {}", resp.status)));
        }
        resp.header("etag")
            .map(str::to_string)
            .ok_or_else(|| self.fetch_failed("response has no ETag header".to_string()))
    }

    fn stored_etag(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.etag_path) {
            Ok(tag) => Ok(Some(tag)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VcsMapError::io(&self.etag_path, e)),
        }
    }

    fn fetch_failed(&self, reason: String) -> VcsMapError {
        VcsMapError::SnapshotFetchFailed {
            url: self.archive_url.clone(),
            reason,
        }
    }
}

enum ExtractError {
    Missing,
    Archive(io::Error),
    Write(PathBuf, io::Error),
}

/// `./a/b` and `a/b` name the same member.
fn normalize_member(path: &str) -> &str {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Directory new files for `path` are staged in, created if needed.
fn staging_dir(path: &Path) -> io::Result<&Path> {
    ensure_parent(path)?;
    Ok(match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    })
}

/// Stream `member` out of a `.tar.bz2` body into `dest`.
///
/// Each call stages into its own temp file next to `dest`, so concurrent
/// fetchers never write into each other's output.
fn extract_member(body: &[u8], member: &str, dest: &Path) -> std::result::Result<u64, ExtractError> {
    let wanted = normalize_member(member);
    let mut archive = Archive::new(BzDecoder::new(Cursor::new(body)));

    for entry in archive.entries().map_err(ExtractError::Archive)? {
        let mut entry = entry.map_err(ExtractError::Archive)?;
        let path = entry.path().map_err(ExtractError::Archive)?;
        if normalize_member(&path.to_string_lossy()) != wanted {
            continue;
        }

        let write_err = |e: io::Error| ExtractError::Write(dest.to_path_buf(), e);
        let dir = staging_dir(dest).map_err(write_err)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        let bytes = io::copy(&mut entry, tmp.as_file_mut()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(dest).map_err(|e| write_err(e.error))?;
        return Ok(bytes);
    }

    Err(ExtractError::Missing)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let io_err = |e: io::Error| VcsMapError::io(path, e);
    let dir = staging_dir(path).map_err(io_err)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
