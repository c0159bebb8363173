//! Mapping store: the in-memory bidirectional index plus its on-disk sources.
//!
//! The index is filled lazily, exactly once per store, from the snapshot file
//! and then the cache file. After that the only mutation path is
//! [`MappingStore::record`], which appends to the cache file and updates both
//! directions of the index together.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::MapperConfig;
use crate::error::{Result, VcsMapError};
use crate::hash::{CommitHash, MappingPair, Scheme};

// ============================================================================
// Bidirectional index
// ============================================================================

/// Result of inserting a pair into a [`BidiIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    New,
    Duplicate,
    /// The pair displaced older counterparts, which were unlinked.
    Replaced {
        old_hg: Option<CommitHash>,
        old_git: Option<CommitHash>,
    },
}

/// git→hg and hg→git, always inverse to each other.
#[derive(Debug, Default, Clone)]
pub struct BidiIndex {
    git_to_hg: HashMap<CommitHash, CommitHash>,
    hg_to_git: HashMap<CommitHash, CommitHash>,
}

impl BidiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.git_to_hg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.git_to_hg.is_empty()
    }

    /// Counterpart of `hash`, where `from` is the scheme of `hash`.
    pub fn get(&self, hash: &CommitHash, from: Scheme) -> Option<&CommitHash> {
        match from {
            Scheme::Git => self.git_to_hg.get(hash),
            Scheme::Hg => self.hg_to_git.get(hash),
        }
    }

    pub fn contains(&self, pair: &MappingPair) -> bool {
        self.git_to_hg.get(&pair.git) == Some(&pair.hg)
    }

    /// The existing pair that `pair` would displace, if any.
    pub fn conflict(&self, pair: &MappingPair) -> Option<MappingPair> {
        if let Some(hg) = self.git_to_hg.get(&pair.git) {
            if hg != &pair.hg {
                return Some(MappingPair::new(pair.git.clone(), hg.clone()));
            }
        }
        if let Some(git) = self.hg_to_git.get(&pair.hg) {
            if git != &pair.git {
                return Some(MappingPair::new(git.clone(), pair.hg.clone()));
            }
        }
        None
    }

    /// Insert `pair`; last write wins.
    pub fn insert(&mut self, pair: MappingPair) -> Insert {
        let MappingPair { git, hg } = pair;
        let prev_hg = self.git_to_hg.insert(git.clone(), hg.clone());
        let prev_git = self.hg_to_git.insert(hg.clone(), git.clone());

        if prev_hg.as_ref() == Some(&hg) && prev_git.as_ref() == Some(&git) {
            return Insert::Duplicate;
        }

        let old_hg = prev_hg.filter(|old| old != &hg);
        let old_git = prev_git.filter(|old| old != &git);

        if let Some(stale) = &old_hg {
            if self.hg_to_git.get(stale) == Some(&git) {
                self.hg_to_git.remove(stale);
            }
        }
        if let Some(stale) = &old_git {
            if self.git_to_hg.get(stale) == Some(&hg) {
                self.git_to_hg.remove(stale);
            }
        }

        if old_hg.is_none() && old_git.is_none() {
            Insert::New
        } else {
            Insert::Replaced { old_hg, old_git }
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = MappingPair> + '_ {
        self.git_to_hg
            .iter()
            .map(|(git, hg)| MappingPair::new(git.clone(), hg.clone()))
    }

    /// Both directions agree entry for entry.
    pub fn is_consistent(&self) -> bool {
        self.git_to_hg.len() == self.hg_to_git.len()
            && self
                .git_to_hg
                .iter()
                .all(|(git, hg)| self.hg_to_git.get(hg) == Some(git))
    }
}

// ============================================================================
// Mapping files
// ============================================================================

/// Parse one `"<git> <hg>"` line. Exactly one space, both sides non-empty.
pub fn parse_line(line: &str) -> Option<MappingPair> {
    let mut fields = line.split(' ');
    let git = fields.next().filter(|s| !s.is_empty())?;
    let hg = fields.next().filter(|s| !s.is_empty())?;
    if fields.next().is_some() {
        return None;
    }
    Some(MappingPair::new(CommitHash::new(git), CommitHash::new(hg)))
}

/// Feed every pair of a mapping file to `on_pair(line_no, pair)`.
///
/// A missing file is empty input. Returns the number of lines read.
fn read_mapping_file(path: &Path, mut on_pair: impl FnMut(usize, MappingPair)) -> Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "mapping file absent, treating as empty");
            return Ok(0);
        }
        Err(e) => return Err(VcsMapError::io(path, e)),
    };

    let mut count = 0;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| VcsMapError::io(path, e))?;
        let pair = parse_line(&line).ok_or_else(|| VcsMapError::MappingFileMalformed {
            path: path.to_path_buf(),
            line: i + 1,
            content: line.clone(),
        })?;
        on_pair(i + 1, pair);
        count += 1;
    }
    Ok(count)
}

fn append_line(path: &Path, pair: &MappingPair) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| VcsMapError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| VcsMapError::io(path, e))?;
    // one write per line: concurrent appenders never split a line
    file.write_all(format!("{}\n", pair.to_line()).as_bytes())
        .map_err(|e| VcsMapError::io(path, e))
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub snapshot_lines: usize,
    pub cache_lines: usize,
    /// Distinct pairs in the index after loading
    pub pairs: usize,
    /// Lines whose pair displaced an earlier, different counterpart
    pub overrides: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(LoadStats),
    AlreadyLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyKnown,
}

pub struct MappingStore {
    snapshot_path: PathBuf,
    cache_path: PathBuf,
    /// `Some` once the one-time load succeeded.
    loaded: Mutex<Option<LoadStats>>,
    index: RwLock<BidiIndex>,
    cache_lock: Mutex<()>,
}

impl MappingStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            cache_path: cache_path.into(),
            loaded: Mutex::new(None),
            index: RwLock::new(BidiIndex::new()),
            cache_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self::new(config.snapshot_path.clone(), config.cache_path.clone())
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    pub fn load_stats(&self) -> Option<LoadStats> {
        self.loaded.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Read the snapshot file, then the cache file, into the index.
    ///
    /// Only the first successful call touches the filesystem; concurrent
    /// callers wait for it. A failed load leaves the index empty and the next
    /// call tries again.
    pub fn load(&self) -> Result<LoadOutcome> {
        let mut loaded = self.loaded.lock();
        if loaded.is_some() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let mut index = BidiIndex::new();
        let mut overrides = 0;

        let snapshot_lines = read_mapping_file(&self.snapshot_path, |line, pair| {
            if let Insert::Replaced { old_hg, old_git } = index.insert(pair.clone()) {
                overrides += 1;
                tracing::warn!(
                    path = %self.snapshot_path.display(),
                    line,
                    git = %pair.git,
                    hg = %pair.hg,
                    ?old_hg,
                    ?old_git,
                    "snapshot maps a commit twice; keeping the later line"
                );
            }
        })?;

        let cache_lines = read_mapping_file(&self.cache_path, |line, pair| {
            if let Insert::Replaced { old_hg, old_git } = index.insert(pair.clone()) {
                overrides += 1;
                tracing::warn!(
                    path = %self.cache_path.display(),
                    line,
                    git = %pair.git,
                    hg = %pair.hg,
                    ?old_hg,
                    ?old_git,
                    "cache disagrees with earlier mapping; cache entry wins"
                );
            }
        })?;

        let stats = LoadStats {
            snapshot_lines,
            cache_lines,
            pairs: index.len(),
            overrides,
        };
        tracing::info!(
            snapshot_lines,
            cache_lines,
            pairs = stats.pairs,
            overrides,
            "mapping store loaded"
        );

        *self.index.write() = index;
        *loaded = Some(stats.clone());
        Ok(LoadOutcome::Loaded(stats))
    }

    /// Counterpart of `hash` (of scheme `from`) if already known. No I/O.
    pub fn lookup(&self, hash: &CommitHash, from: Scheme) -> Option<CommitHash> {
        self.index.read().get(hash, from).cloned()
    }

    /// Persist a newly resolved pair to the cache file and the index.
    ///
    /// Recording a known pair again is a no-op. A pair that contradicts an
    /// existing mapping is rejected and nothing is written.
    pub fn record(&self, pair: MappingPair) -> Result<RecordOutcome> {
        self.load()?;

        let _guard = self.cache_lock.lock();
        {
            let index = self.index.read();
            if index.contains(&pair) {
                return Ok(RecordOutcome::AlreadyKnown);
            }
            if let Some(existing) = index.conflict(&pair) {
                return Err(VcsMapError::MappingConflict {
                    git: pair.git,
                    hg: pair.hg,
                    existing_git: existing.git,
                    existing_hg: existing.hg,
                });
            }
        }

        append_line(&self.cache_path, &pair)?;
        tracing::debug!(git = %pair.git, hg = %pair.hg, "recorded mapping in cache");
        self.index.write().insert(pair);
        Ok(RecordOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(git: &str, hg: &str) -> MappingPair {
        MappingPair::new(CommitHash::new(git), CommitHash::new(hg))
    }

    #[test]
    fn parse_line_requires_exactly_two_fields() {
        assert_eq!(parse_line("deadbeef cafebabe"), Some(pair("deadbeef", "cafebabe")));
        assert_eq!(parse_line("onlyonetoken"), None);
        assert_eq!(parse_line("a b c"), None);
        assert_eq!(parse_line("a  b"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("a "), None);
    }

    #[test]
    fn replacing_a_counterpart_unlinks_the_stale_side() {
        let mut index = BidiIndex::new();
        assert_eq!(index.insert(pair("g1", "h1")), Insert::New);
        assert_eq!(index.insert(pair("g1", "h1")), Insert::Duplicate);

        let outcome = index.insert(pair("g1", "h2"));
        assert_eq!(
            outcome,
            Insert::Replaced {
                old_hg: Some(CommitHash::new("h1")),
                old_git: None
            }
        );
        assert_eq!(index.get(&CommitHash::new("h1"), Scheme::Hg), None);
        assert_eq!(
            index.get(&CommitHash::new("h2"), Scheme::Hg),
            Some(&CommitHash::new("g1"))
        );
        assert_eq!(index.len(), 1);
        assert!(index.is_consistent());
    }

    #[test]
    fn conflict_reports_the_displaced_pair() {
        let mut index = BidiIndex::new();
        index.insert(pair("g1", "h1"));
        assert_eq!(index.conflict(&pair("g1", "h1")), None);
        assert_eq!(index.conflict(&pair("g1", "h9")), Some(pair("g1", "h1")));
        assert_eq!(index.conflict(&pair("g9", "h1")), Some(pair("g1", "h1")));
        assert_eq!(index.conflict(&pair("g2", "h2")), None);
    }

    proptest! {
        #[test]
        fn index_stays_a_bijection(
            ops in prop::collection::vec(("[a-d]", "[w-z]"), 0..64)
        ) {
            let mut index = BidiIndex::new();
            for (git, hg) in &ops {
                index.insert(pair(git, hg));
                prop_assert!(index.is_consistent());
            }
            if let Some((git, hg)) = ops.last() {
                let expected = CommitHash::new(hg.as_str());
                prop_assert_eq!(
                    index.get(&CommitHash::new(git.as_str()), Scheme::Git),
                    Some(&expected)
                );
            }
        }
    }
}
