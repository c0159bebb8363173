//! Git ↔ Mercurial resolution with remote fallback.
//!
//! Lookups go to the [`MappingStore`] first. On a miss the mapper service is
//! asked (`GET <base>/<repo>/rev/<scheme>/<hash>`, answer `"<git> <hg> ..."`)
//! and the answer is recorded, so each miss is paid for once.

use std::sync::Arc;

use crate::config::MapperConfig;
use crate::error::{Result, VcsMapError};
use crate::hash::{CommitHash, MappingPair, Scheme};
use crate::http::Transport;
use crate::store::MappingStore;

/// Where the remote mapper service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    base: String,
    repository: String,
}

impl ServiceEndpoint {
    pub fn new(base: impl Into<String>, repository: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            repository: repository.into(),
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self::new(config.service_base.clone(), config.repository.clone())
    }

    pub fn lookup_url(&self, scheme: Scheme, hash: &CommitHash) -> String {
        format!(
            "{}/{}/rev/{}/{}",
            self.base,
            self.repository,
            scheme.path_segment(),
            hash
        )
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Snapshot or cache file, via the in-memory index
    Local,
    /// Mapper service
    Remote,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Never fall back to the mapper service.
    pub cache_only: bool,
    /// Collect per-hash misses instead of stopping at the first one.
    pub keep_going: bool,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub resolved: Vec<MappingPair>,
    /// How many of `resolved` needed the mapper service
    pub remote: usize,
    pub failures: Vec<(CommitHash, VcsMapError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Resolver {
    store: Arc<MappingStore>,
    transport: Arc<dyn Transport>,
    service: ServiceEndpoint,
}

impl Resolver {
    pub fn new(
        store: Arc<MappingStore>,
        transport: Arc<dyn Transport>,
        service: ServiceEndpoint,
    ) -> Self {
        Self {
            store,
            transport,
            service,
        }
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    pub fn service(&self) -> &ServiceEndpoint {
        &self.service
    }

    /// Git hash of a Mercurial changeset.
    pub fn hg_to_git(&self, hg: &CommitHash) -> Result<CommitHash> {
        self.resolve(hg, Scheme::Hg, false)
    }

    /// Mercurial hash of a Git commit.
    ///
    /// With `cache_only` a miss fails with [`VcsMapError::CacheOnlyMiss`]
    /// without touching the network.
    pub fn git_to_hg(&self, git: &CommitHash, cache_only: bool) -> Result<CommitHash> {
        self.resolve(git, Scheme::Git, cache_only)
    }

    /// Counterpart of `hash`, which belongs to scheme `from`.
    pub fn resolve(&self, hash: &CommitHash, from: Scheme, cache_only: bool) -> Result<CommitHash> {
        self.resolve_traced(hash, from, cache_only)
            .map(|(counterpart, _)| counterpart)
    }

    pub fn resolve_traced(
        &self,
        hash: &CommitHash,
        from: Scheme,
        cache_only: bool,
    ) -> Result<(CommitHash, Tier)> {
        self.resolve_pair(hash, from, cache_only)
            .map(|(pair, tier)| (pair.get(from.other()).clone(), tier))
    }

    /// Full pair for `hash`. A remote answer carries the service's full
    /// hashes, which may be longer than an abbreviated `hash`.
    fn resolve_pair(
        &self,
        hash: &CommitHash,
        from: Scheme,
        cache_only: bool,
    ) -> Result<(MappingPair, Tier)> {
        self.store.load()?;

        if let Some(hit) = self.store.lookup(hash, from) {
            tracing::debug!(%hash, scheme = %from, "local mapping hit");
            return Ok((pair_of(hash.clone(), hit, from), Tier::Local));
        }

        if cache_only {
            return Err(VcsMapError::CacheOnlyMiss {
                scheme: from,
                hash: hash.clone(),
            });
        }

        tracing::debug!(%hash, scheme = %from, "local miss, asking mapper service");
        let pair = self.fetch_remote(hash, from)?;
        self.store.record(pair.clone())?;
        Ok((pair, Tier::Remote))
    }

    fn fetch_remote(&self, hash: &CommitHash, from: Scheme) -> Result<MappingPair> {
        let url = self.service.lookup_url(from, hash);
        let not_found = |reason: String| VcsMapError::HashNotFound {
            scheme: from,
            hash: hash.clone(),
            reason,
        };

        let resp = self
            .transport
            .get(&url)
            .map_err(|e| not_found(e.to_string()))?;
        if !resp.is_success() {
            return Err(not_found(format!(
                "mapper service returned status {}",
                resp.status
            )));
        }

        let body = resp.text();
        let tokens: Vec<&str> = body.split_whitespace().collect();
        let invalid = || VcsMapError::InvalidServiceResponse {
            url: url.clone(),
            body: body.clone(),
        };
        let queried = tokens.get(from.token_index()).ok_or_else(invalid)?;
        let counterpart = tokens.get(from.other().token_index()).ok_or_else(invalid)?;

        // the answer must be about the commit we asked for
        if !queried.to_ascii_lowercase().starts_with(hash.as_str()) {
            return Err(invalid());
        }

        Ok(pair_of(
            CommitHash::new(queried.to_ascii_lowercase()),
            CommitHash::new(*counterpart),
            from,
        ))
    }

    /// Resolve many hashes of one scheme, e.g. every commit of a checkout.
    pub fn resolve_batch<I>(&self, hashes: I, from: Scheme, options: BatchOptions) -> Result<BatchReport>
    where
        I: IntoIterator<Item = CommitHash>,
    {
        let mut report = BatchReport::default();

        for (i, hash) in hashes.into_iter().enumerate() {
            match self.resolve_pair(&hash, from, options.cache_only) {
                Ok((pair, tier)) => {
                    if tier == Tier::Remote {
                        report.remote += 1;
                    }
                    report.resolved.push(pair);
                }
                Err(err) if options.keep_going && err.is_miss() => {
                    tracing::warn!(%hash, error = %err, "skipping unresolved commit");
                    report.failures.push((hash, err));
                }
                Err(err) => return Err(err),
            }

            if (i + 1) % 10_000 == 0 {
                tracing::info!(done = i + 1, remote = report.remote, "batch progress");
            }
        }

        Ok(report)
    }
}

/// Pair from a hash of scheme `from` and its counterpart.
fn pair_of(hash: CommitHash, counterpart: CommitHash, from: Scheme) -> MappingPair {
    match from {
        Scheme::Git => MappingPair::new(hash, counterpart),
        Scheme::Hg => MappingPair::new(counterpart, hash),
    }
}
