//! vcsmap: Git ↔ Mercurial commit hash translation
//!
//! Translates commit identifiers between the two naming schemes of a mirrored
//! repository using three tiers of knowledge:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         RESOLUTION TIERS                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐     ┌──────────────────────────────┐                  │
//! │  │ Resolver │────►│        MappingStore          │                  │
//! │  └──────────┘     │  ┌────────────┐ ┌──────────┐ │                  │
//! │       │           │  │  snapshot  │ │  cache   │ │  (loaded once)   │
//! │       │ miss      │  │ (bulk,etag)│ │ (append) │ │                  │
//! │       ▼           │  └────────────┘ └──────────┘ │                  │
//! │  ┌──────────┐     └──────────────▲───────────────┘                  │
//! │  │  remote  │───── record ───────┘                                  │
//! │  │  service │                                                       │
//! │  └──────────┘                                                       │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`snapshot::SnapshotFetcher`] keeps the bulk mapping file current,
//!   using the archive's entity tag to skip redundant downloads.
//! - [`store::MappingStore`] owns the in-memory bidirectional index and the
//!   append-only cache file.
//! - [`resolver::Resolver`] answers lookups, falling back to the remote
//!   mapper service on a miss and persisting what it learns.
//!
//! All network access goes through the [`http::Transport`] seam.

pub mod config;
pub mod error;
pub mod hash;
pub mod http;
pub mod resolver;
pub mod snapshot;
pub mod store;


pub use config::MapperConfig;
pub use error::{Result, VcsMapError};
pub use hash::{CommitHash, MappingPair, Scheme};
pub use http::{HttpResponse, MockTransport, ReqwestTransport, Transport, TransportError};
pub use resolver::{BatchOptions, BatchReport, Resolver, ServiceEndpoint};
pub use snapshot::{SnapshotFetcher, SnapshotStatus};
pub use store::{LoadOutcome, LoadStats, MappingStore, RecordOutcome};
