//! Git provenance resolution for image labels.
//!
//! Provenance is best effort: a missing repository or a failed git
//! invocation only means the corresponding label is omitted. The two cases
//! are modeled separately so callers (and tests) can tell which path was
//! taken. Every git subprocess is bounded by a fixed timeout so a
//! misconfigured or networked VCS backend cannot hang the build.

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// CI-provided commit SHA, preferred over a git query when set.
pub const COMMIT_ENV: &str = "GITHUB_SHA";

/// CI-provided ref name, preferred over a git query when set.
pub const REF_ENV: &str = "GITHUB_REF_NAME";

/// Bound on each git subprocess invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of a provenance lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// A commit id or tag was resolved.
    Resolved(String),
    /// The directory is not a version-controlled work tree and no CI
    /// override exists; nothing to resolve.
    NotApplicable,
    /// The lookup itself failed (git error, timeout).
    Unavailable(String),
}

impl Provenance {
    /// The resolved value, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            Provenance::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// Resolve the current commit id for a source directory.
pub async fn head_commit(dir: &Path) -> Provenance {
    if let Some(v) = env_override(COMMIT_ENV) {
        return Provenance::Resolved(v);
    }
    if !is_work_tree(dir).await {
        return Provenance::NotApplicable;
    }
    match git_output(dir, &["rev-parse", "HEAD"]).await {
        Ok(out) => Provenance::Resolved(out),
        Err(e) => Provenance::Unavailable(e),
    }
}

/// Resolve the nearest descriptive tag for a source directory.
pub async fn describe_tag(dir: &Path) -> Provenance {
    if let Some(v) = env_override(REF_ENV) {
        return Provenance::Resolved(v);
    }
    if !is_work_tree(dir).await {
        return Provenance::NotApplicable;
    }
    match git_output(dir, &["describe", "--tags", "--dirty"]).await {
        Ok(out) => Provenance::Resolved(out),
        Err(e) => Provenance::Unavailable(e),
    }
}

fn env_override(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

/// Bounded probe for "is this directory inside a work tree". Any probe
/// failure is treated as "not a work tree".
async fn is_work_tree(dir: &Path) -> bool {
    match git_output(dir, &["rev-parse", "--is-inside-work-tree"]).await {
        Ok(out) => out == "true",
        Err(e) => {
            debug!("Work tree probe failed: {}", e);
            false
        }
    }
}

/// Run a git subcommand against `dir`, bounded by `GIT_TIMEOUT`.
async fn git_output(dir: &Path, args: &[&str]) -> std::result::Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir).args(args).kill_on_drop(true);

    let output = timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| format!("git {} timed out after {:?}", args.join(" "), GIT_TIMEOUT))?
        .map_err(|e| format!("Failed to run git: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {} failed: {}", args.join(" "), stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
