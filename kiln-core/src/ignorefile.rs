//! Scoped management of the build-exclusion file.
//!
//! The build engine consumes a single `.dockerignore` per source directory,
//! and the split-weights pipeline needs different exclusion sets for the
//! weights and runner phases. `IgnoreGuard` backs the user's file up on
//! acquisition and guarantees the original on-disk state is restored on
//! every exit path, including engine failures mid-pipeline.

use crate::error::{KilnError, Result};
use crate::paths;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusion-file header applied while building the weights image.
pub const WEIGHTS_IGNORE_HEADER: &str = "# generated by kiln\n.kiln\n";

/// Scoped holder of the exclusion file for one build.
///
/// `acquire` moves any pre-existing file to a backup path; `write` installs
/// phase-specific contents (preserving the user's exclusions by prepending
/// the backup); `restore` puts the original state back. Dropping an active
/// guard restores as a backstop so a failed build never leaves the file
/// replaced or deleted.
#[derive(Debug)]
pub struct IgnoreGuard {
    ignore_path: PathBuf,
    backup_path: PathBuf,
    active: bool,
}

impl IgnoreGuard {
    /// Back up the exclusion file (if one exists) and take ownership of the
    /// active path for the duration of the guard.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let ignore_path = paths::ignore_file(dir);
        let backup_path = paths::ignore_backup_file(dir);

        if ignore_path.exists() {
            fs::rename(&ignore_path, &backup_path).map_err(|e| KilnError::IoError {
                path: ignore_path.clone(),
                source: e,
            })?;
            debug!(backup = %backup_path.display(), "Backed up exclusion file");
        }

        Ok(Self { ignore_path, backup_path, active: true })
    }

    /// Write phase-specific contents as the active exclusion file.
    ///
    /// The backed-up user content, when present, is prepended so prior
    /// exclusions stay in force. Reading from the backup (never the active
    /// file) makes repeated writes within a phase idempotent.
    pub fn write(&self, contents: &str) -> Result<()> {
        let mut merged = String::new();
        if self.backup_path.exists() {
            let existing =
                fs::read_to_string(&self.backup_path).map_err(|e| KilnError::FileReadError {
                    path: self.backup_path.clone(),
                    source: e,
                })?;
            merged.push_str(&existing);
            merged.push('\n');
        }
        merged.push_str(contents);

        fs::write(&self.ignore_path, merged).map_err(|e| KilnError::IoError {
            path: self.ignore_path.clone(),
            source: e,
        })
    }

    /// Restore the pre-pipeline state: delete the active file and move the
    /// backup (if any) back into place.
    pub fn restore(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        if let Err(e) = fs::remove_file(&self.ignore_path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(KilnError::IoError { path: self.ignore_path.clone(), source: e });
            }
        }

        match fs::rename(&self.backup_path, &self.ignore_path) {
            Ok(()) => {
                debug!(path = %self.ignore_path.display(), "Restored exclusion file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KilnError::IoError { path: self.backup_path.clone(), source: e }),
        }
    }
}

impl Drop for IgnoreGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.restore() {
                warn!("Failed to restore exclusion file: {}", e);
            }
        }
    }
}

/// Fail fast when an existing exclusion file would exclude the private
/// working directory. The pipeline bundles schema and cache state there,
/// and a build that ignores it cannot proceed.
pub fn check_compatible_ignore_file(dir: &Path) -> Result<()> {
    let ignore_path = paths::ignore_file(dir);
    if !ignore_path.exists() {
        return Ok(());
    }

    let content = fs::read_to_string(&ignore_path).map_err(|e| KilnError::FileReadError {
        path: ignore_path.clone(),
        source: e,
    })?;

    // Last matching pattern wins, matching the engine's ignore semantics.
    let mut excluded = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (negated, pattern) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let pattern = pattern.trim_end_matches('/');

        if matches_work_dir(pattern) {
            excluded = !negated;
        }
    }

    if excluded {
        return Err(KilnError::IncompatibleIgnoreFile {
            reason: format!(
                "The {} tmp path cannot be excluded by the build engine in {}",
                paths::WORK_DIR,
                paths::IGNORE_FILE
            ),
        });
    }
    Ok(())
}

/// Whether a single exclusion pattern covers the working directory.
fn matches_work_dir(pattern: &str) -> bool {
    if pattern == paths::WORK_DIR {
        return true;
    }
    glob::Pattern::new(pattern)
        .map(|p| p.matches(paths::WORK_DIR))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_with_no_file_restores_to_absent() {
        let temp = tempdir().unwrap();
        let ignore = paths::ignore_file(temp.path());

        let mut guard = IgnoreGuard::acquire(temp.path()).unwrap();
        guard.write("generated\n").unwrap();
        assert!(ignore.exists());

        guard.restore().unwrap();
        assert!(!ignore.exists());
        assert!(!paths::ignore_backup_file(temp.path()).exists());
    }

    #[test]
    fn test_restore_preserves_original_content() {
        let temp = tempdir().unwrap();
        let ignore = paths::ignore_file(temp.path());
        fs::write(&ignore, "user-pattern\n").unwrap();

        let mut guard = IgnoreGuard::acquire(temp.path()).unwrap();
        guard.write("generated\n").unwrap();

        let active = fs::read_to_string(&ignore).unwrap();
        assert!(active.contains("user-pattern"));
        assert!(active.contains("generated"));

        guard.restore().unwrap();
        assert_eq!(fs::read_to_string(&ignore).unwrap(), "user-pattern\n");
        assert!(!paths::ignore_backup_file(temp.path()).exists());
    }

    #[test]
    fn test_drop_restores_when_not_explicitly_released() {
        let temp = tempdir().unwrap();
        let ignore = paths::ignore_file(temp.path());
        fs::write(&ignore, "original\n").unwrap();

        {
            let guard = IgnoreGuard::acquire(temp.path()).unwrap();
            guard.write("phase contents\n").unwrap();
            // guard dropped here without restore(), as on a build failure
        }

        assert_eq!(fs::read_to_string(&ignore).unwrap(), "original\n");
    }

    #[test]
    fn test_write_is_idempotent_within_a_phase() {
        let temp = tempdir().unwrap();
        let ignore = paths::ignore_file(temp.path());
        fs::write(&ignore, "user\n").unwrap();

        let mut guard = IgnoreGuard::acquire(temp.path()).unwrap();
        guard.write("phase\n").unwrap();
        let first = fs::read_to_string(&ignore).unwrap();
        guard.write("phase\n").unwrap();
        let second = fs::read_to_string(&ignore).unwrap();
        assert_eq!(first, second);

        guard.restore().unwrap();
    }

    #[test]
    fn test_restore_twice_is_a_no_op() {
        let temp = tempdir().unwrap();
        fs::write(paths::ignore_file(temp.path()), "x\n").unwrap();

        let mut guard = IgnoreGuard::acquire(temp.path()).unwrap();
        guard.restore().unwrap();
        guard.restore().unwrap();
        assert_eq!(fs::read_to_string(paths::ignore_file(temp.path())).unwrap(), "x\n");
    }

    #[test]
    fn test_compatible_check_passes_without_file() {
        let temp = tempdir().unwrap();
        assert!(check_compatible_ignore_file(temp.path()).is_ok());
    }

    #[test]
    fn test_compatible_check_rejects_work_dir_exclusion() {
        let temp = tempdir().unwrap();
        fs::write(paths::ignore_file(temp.path()), "*.log\n.kiln\n").unwrap();
        assert!(check_compatible_ignore_file(temp.path()).is_err());
    }

    #[test]
    fn test_compatible_check_rejects_glob_exclusion() {
        let temp = tempdir().unwrap();
        fs::write(paths::ignore_file(temp.path()), ".k*\n").unwrap();
        assert!(check_compatible_ignore_file(temp.path()).is_err());
    }

    #[test]
    fn test_compatible_check_honors_negation() {
        let temp = tempdir().unwrap();
        fs::write(paths::ignore_file(temp.path()), ".kiln\n!.kiln\n").unwrap();
        assert!(check_compatible_ignore_file(temp.path()).is_ok());
    }

    #[test]
    fn test_compatible_check_allows_unrelated_patterns() {
        let temp = tempdir().unwrap();
        fs::write(paths::ignore_file(temp.path()), "*.log\nnode_modules/\n").unwrap();
        assert!(check_compatible_ignore_file(temp.path()).is_ok());
    }
}
