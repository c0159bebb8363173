//! Integration tests for the complete vcsmap pipeline
//!
//! These tests drive the three tiers together:
//! - bulk archive → snapshot file (entity-tag gated)
//! - snapshot + cache file → mapping store
//! - store miss → mapper service → cache file
//!
//! Run with: cargo test --test integration_tests

use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use vcsmap_core::http::Method;
use vcsmap_core::*;

const ARCHIVE_URL: &str = "http://archive.test/mapping/gecko-dev/git-mapfile.tar.bz2";
const SERVICE: &str = "http://mapper.test";

fn archive(table: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(BzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(table.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(
            &mut header,
            config::DEFAULT_ARCHIVE_MEMBER,
            table.as_bytes(),
        )
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn publish(mock: &MockTransport, etag: &str, table: &str) {
    mock.route(
        Method::Head,
        ARCHIVE_URL,
        HttpResponse::ok(Vec::new()).with_header("ETag", etag),
    );
    mock.route(Method::Get, ARCHIVE_URL, HttpResponse::ok(archive(table)));
}

fn config_in(dir: &std::path::Path) -> MapperConfig {
    MapperConfig {
        archive_url: ARCHIVE_URL.to_string(),
        service_base: SERVICE.to_string(),
        snapshot_path: dir.join("vcs_map_full"),
        cache_path: dir.join("vcs_map_cache"),
        ..Default::default()
    }
}

fn resolver_for(config: &MapperConfig, mock: &Arc<MockTransport>) -> Resolver {
    Resolver::new(
        Arc::new(MappingStore::from_config(config)),
        mock.clone(),
        ServiceEndpoint::from_config(config),
    )
}

#[test]
fn test_fetch_then_resolve_without_network() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let mock = Arc::new(MockTransport::new());
    publish(&mock, "\"v1\"", "deadbeef cafebabe\n");

    SnapshotFetcher::from_config(mock.clone(), &config)
        .ensure_snapshot()
        .unwrap();
    let calls_after_fetch = mock.call_count();

    let resolver = resolver_for(&config, &mock);
    assert_eq!(
        resolver.hg_to_git(&CommitHash::new("cafebabe")).unwrap(),
        CommitHash::new("deadbeef")
    );
    assert_eq!(mock.call_count(), calls_after_fetch);
}

#[test]
fn test_three_tiers_across_runs() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let mock = Arc::new(MockTransport::new());
    publish(&mock, "\"v1\"", "aaaa0001 bbbb0001\n");
    mock.route(
        Method::Get,
        &format!("{SERVICE}/gecko-dev/rev/hg/bbbb0002"),
        HttpResponse::ok("aaaa0002 bbbb0002"),
    );

    // run 1: snapshot hit + one remote miss
    let fetcher = SnapshotFetcher::from_config(mock.clone(), &config);
    fetcher.ensure_snapshot().unwrap();
    let resolver = resolver_for(&config, &mock);
    let report = resolver
        .resolve_batch(
            vec![CommitHash::new("bbbb0001"), CommitHash::new("bbbb0002")],
            Scheme::Hg,
            BatchOptions::default(),
        )
        .unwrap();
    assert_eq!(report.resolved.len(), 2);
    assert_eq!(report.remote, 1);

    // run 2: unchanged etag, everything local
    assert!(matches!(
        fetcher.ensure_snapshot().unwrap(),
        SnapshotStatus::UpToDate { .. }
    ));
    let offline = Arc::new(MockTransport::new());
    let resolver = resolver_for(&config, &offline);
    assert_eq!(
        resolver
            .git_to_hg(&CommitHash::new("aaaa0002"), true)
            .unwrap(),
        CommitHash::new("bbbb0002")
    );
    assert_eq!(offline.call_count(), 0);

    // run 3: upstream snapshot now includes the pair; cache agrees with it
    publish(
        &mock,
        "\"v2\"",
        "aaaa0001 bbbb0001\naaaa0002 bbbb0002\naaaa0003 bbbb0003\n",
    );
    assert!(matches!(
        fetcher.ensure_snapshot().unwrap(),
        SnapshotStatus::Refreshed { .. }
    ));
    let store = MappingStore::from_config(&config);
    let LoadOutcome::Loaded(stats) = store.load().unwrap() else {
        panic!("expected first load");
    };
    assert_eq!(stats.snapshot_lines, 3);
    assert_eq!(stats.cache_lines, 1);
    assert_eq!(stats.pairs, 3);
    assert_eq!(stats.overrides, 0);

    assert_eq!(fs::read_to_string(config.etag_path()).unwrap(), "\"v2\"");
}

#[test]
fn test_fetch_failure_leaves_previous_snapshot() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let mock = Arc::new(MockTransport::new());
    publish(&mock, "\"v1\"", "deadbeef cafebabe\n");
    let fetcher = SnapshotFetcher::from_config(mock.clone(), &config);
    fetcher.ensure_snapshot().unwrap();

    // new tag, but the download fails
    mock.route(
        Method::Head,
        ARCHIVE_URL,
        HttpResponse::ok(Vec::new()).with_header("ETag", "\"v2\""),
    );
    mock.route(Method::Get, ARCHIVE_URL, HttpResponse::new(500, Vec::new()));

    let err = fetcher.ensure_snapshot().unwrap_err();
    assert!(matches!(err, VcsMapError::SnapshotFetchFailed { .. }));
    assert_eq!(
        fs::read_to_string(&config.snapshot_path).unwrap(),
        "deadbeef cafebabe\n"
    );
    assert_eq!(fs::read_to_string(config.etag_path()).unwrap(), "\"v1\"");
}
