//! Commit enumeration for a local checkout.
//!
//! We shell out to the VCS client instead of linking a library: `hg log` for
//! Mercurial, `git rev-list --all` for Git.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;
use vcsmap_core::{CommitHash, Scheme};

pub fn list_revisions(repo_dir: &Path, scheme: Scheme) -> Result<Vec<CommitHash>> {
    let mut cmd = match scheme {
        Scheme::Hg => {
            let mut cmd = Command::new("hg");
            cmd.arg("-R")
                .arg(repo_dir)
                .arg("log")
                .arg("--template")
                .arg("{node}\n");
            cmd
        }
        Scheme::Git => {
            let mut cmd = Command::new("git");
            cmd.arg("-C").arg(repo_dir).arg("rev-list").arg("--all");
            cmd
        }
    };

    let program = match scheme {
        Scheme::Hg => "hg log",
        Scheme::Git => "git rev-list",
    };
    let out = cmd
        .output()
        .with_context(|| format!("failed to run `{program}` in {}", repo_dir.display()))?;
    if !out.status.success() {
        return Err(anyhow!(
            "`{program}` failed:\n{}",
            String::from_utf8_lossy(&out.stderr)
        ));
    }

    let revisions = parse_revisions(&String::from_utf8_lossy(&out.stdout))?;
    tracing::info!(
        repo = %repo_dir.display(),
        scheme = %scheme,
        count = revisions.len(),
        "enumerated checkout revisions"
    );
    Ok(revisions)
}

/// One hash per line; blank lines are ignored.
pub fn parse_revisions(text: &str) -> Result<Vec<CommitHash>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| CommitHash::parse(line).with_context(|| format!("bad revision line {line:?}")))
        .collect()
}
