//! vcsmap CLI
//!
//! Command-line front end for Git ↔ Mercurial commit translation:
//! - refreshing the bulk mapping snapshot (`fetch`)
//! - translating individual hashes (`hg-to-git`, `git-to-hg`)
//! - translating every commit of a local checkout (`translate`)
//! - inspecting local mapping state (`stats`)

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vcsmap_core::{
    BatchOptions, CommitHash, LoadOutcome, MapperConfig, MappingStore, ReqwestTransport, Resolver,
    Scheme, ServiceEndpoint, SnapshotFetcher, SnapshotStatus, Transport,
};

mod checkout;

#[derive(Parser)]
#[command(name = "vcsmap")]
#[command(
    author,
    version,
    about = "Translate commit hashes between a Mercurial repository and its Git mirror"
)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// More logging on stderr (`-v` info, `-vv` debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SettingsArgs {
    /// JSON config file (any subset of the config fields).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local copy of the bulk mapping.
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Append-only cache of remotely resolved pairs.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Bulk mapping archive URL (`.tar.bz2`).
    #[arg(long, global = true)]
    archive_url: Option<String>,

    /// Mapper service base URL.
    #[arg(long, global = true)]
    service_url: Option<String>,

    /// Repository name on the mapper service.
    #[arg(long, global = true)]
    repository: Option<String>,

    /// Per-request timeout in seconds (mapper lookups, `HEAD`).
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Timeout in seconds for downloading the bulk archive.
    #[arg(long, global = true)]
    archive_timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the bulk mapping if its entity tag changed.
    Fetch,

    /// Print the Git hash of each Mercurial changeset (`<hg> <git>`).
    HgToGit {
        #[arg(required = true)]
        hashes: Vec<String>,
    },

    /// Print the Mercurial hash of each Git commit (`<git> <hg>`).
    GitToHg {
        /// Only consult the snapshot and cache; never call the mapper service.
        #[arg(long)]
        cache_only: bool,

        #[arg(required = true)]
        hashes: Vec<String>,
    },

    /// Translate every commit of a local checkout.
    ///
    /// Refreshes the snapshot first (unless `--no-fetch`), enumerates the
    /// checkout with `hg log` / `git rev-list --all`, and resolves each hash.
    Translate {
        /// Path to the checkout
        repo_dir: PathBuf,

        /// Scheme of the checkout (`hg` or `git`)
        #[arg(long, default_value = "hg")]
        scheme: String,

        /// Skip the snapshot refresh.
        #[arg(long)]
        no_fetch: bool,

        /// Never call the mapper service.
        #[arg(long)]
        cache_only: bool,

        /// Report unresolved commits at the end instead of stopping at the first.
        #[arg(long)]
        keep_going: bool,

        /// Write `<git> <hg>` lines for every resolved commit.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Load local mapping state and print its size.
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = build_config(&cli.settings)?;
    match cli.command {
        Commands::Fetch => cmd_fetch(&config),
        Commands::HgToGit { hashes } => cmd_lookup(&config, Scheme::Hg, &hashes, false),
        Commands::GitToHg { cache_only, hashes } => {
            cmd_lookup(&config, Scheme::Git, &hashes, cache_only)
        }
        Commands::Translate {
            repo_dir,
            scheme,
            no_fetch,
            cache_only,
            keep_going,
            out,
        } => {
            let scheme: Scheme = scheme.parse()?;
            cmd_translate(
                &config,
                &repo_dir,
                scheme,
                !no_fetch,
                BatchOptions {
                    cache_only,
                    keep_going,
                },
                out.as_deref(),
            )
        }
        Commands::Stats => cmd_stats(&config),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// defaults → `--config` file → `VCSMAP_*` env → flags
fn build_config(args: &SettingsArgs) -> Result<MapperConfig> {
    let mut config = match &args.config {
        Some(path) => MapperConfig::from_json_file(path)?,
        None => MapperConfig::default(),
    };
    config.apply_env()?;

    if let Some(path) = &args.snapshot {
        config.snapshot_path = path.clone();
    }
    if let Some(path) = &args.cache {
        config.cache_path = path.clone();
    }
    if let Some(url) = &args.archive_url {
        config.archive_url = url.clone();
    }
    if let Some(url) = &args.service_url {
        config.service_base = url.clone();
    }
    if let Some(repo) = &args.repository {
        config.repository = repo.clone();
    }
    if let Some(secs) = args.timeout_secs {
        config.timeout_secs = secs;
    }
    if let Some(secs) = args.archive_timeout_secs {
        config.archive_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

fn transport(config: &MapperConfig) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(ReqwestTransport::from_config(config)?))
}

fn resolver(config: &MapperConfig) -> Result<Resolver> {
    Ok(Resolver::new(
        Arc::new(MappingStore::from_config(config)),
        transport(config)?,
        ServiceEndpoint::from_config(config),
    ))
}

fn ensure_snapshot(config: &MapperConfig) -> Result<()> {
    let fetcher = SnapshotFetcher::from_config(transport(config)?, config);
    match fetcher.ensure_snapshot()? {
        SnapshotStatus::UpToDate { etag } => {
            println!(
                "{} {} ({})",
                "Snapshot up to date".green().bold(),
                fetcher.snapshot_path().display(),
                etag
            );
        }
        SnapshotStatus::Refreshed { etag, bytes, .. } => {
            println!(
                "{} {} ({} bytes, {})",
                "Snapshot refreshed".green().bold(),
                fetcher.snapshot_path().display(),
                bytes,
                etag
            );
        }
    }
    Ok(())
}

fn cmd_fetch(config: &MapperConfig) -> Result<()> {
    ensure_snapshot(config)
}

fn cmd_lookup(config: &MapperConfig, from: Scheme, hashes: &[String], cache_only: bool) -> Result<()> {
    let resolver = resolver(config)?;
    for raw in hashes {
        let hash = CommitHash::parse(raw)?;
        let counterpart = resolver.resolve(&hash, from, cache_only)?;
        println!("{hash} {counterpart}");
    }
    Ok(())
}

fn cmd_translate(
    config: &MapperConfig,
    repo_dir: &Path,
    scheme: Scheme,
    fetch: bool,
    options: BatchOptions,
    out: Option<&Path>,
) -> Result<()> {
    if fetch {
        ensure_snapshot(config)?;
    }

    let revisions = checkout::list_revisions(repo_dir, scheme)?;
    let total = revisions.len();
    println!(
        "{} {} ({} {} commits)",
        "Translating".cyan().bold(),
        repo_dir.display(),
        total,
        scheme
    );

    let resolver = resolver(config)?;
    let report = resolver.resolve_batch(revisions, scheme, options)?;

    if let Some(path) = out {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for pair in &report.resolved {
            writeln!(writer, "{}", pair.to_line())?;
        }
        writer.flush()?;
    }

    println!(
        "{} {}/{} commits ({} via mapper service)",
        "Translated".green().bold(),
        report.resolved.len(),
        total,
        report.remote
    );

    if report.is_complete() {
        return Ok(());
    }
    for (hash, err) in &report.failures {
        eprintln!("  {} {hash}: {err}", "✗".red());
    }
    Err(anyhow!(
        "{} of {} commits could not be translated",
        report.failures.len(),
        total
    ))
}

fn cmd_stats(config: &MapperConfig) -> Result<()> {
    let store = MappingStore::from_config(config);
    let stats = match store.load()? {
        LoadOutcome::Loaded(stats) => stats,
        LoadOutcome::AlreadyLoaded => store
            .load_stats()
            .ok_or_else(|| anyhow!("mapping store reported loaded without stats"))?,
    };

    println!("{}", "Mapping state".green().bold());
    println!(
        "  snapshot: {} ({} lines)",
        config.snapshot_path.display(),
        stats.snapshot_lines
    );
    match fs::read_to_string(config.etag_path()) {
        Ok(etag) => println!("  etag:     {etag}"),
        Err(_) => println!("  etag:     {}", "none".dimmed()),
    }
    println!(
        "  cache:    {} ({} lines)",
        config.cache_path.display(),
        stats.cache_lines
    );
    println!("  pairs:    {}", stats.pairs);
    if stats.overrides > 0 {
        println!(
            "  {} {} lines overrode an earlier mapping (see -v)",
            "warning:".yellow().bold(),
            stats.overrides
        );
    }
    Ok(())
}
