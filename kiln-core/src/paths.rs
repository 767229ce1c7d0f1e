//! Centralized path configuration for Kiln build state.
//!
//! All transient build-time paths are relative to the model source directory
//! and should go through this module so the pipeline, generator, and engine
//! agree on where state lives. None of these files end up in the final image.

use std::path::{Path, PathBuf};

/// Private working directory inside the model source tree.
pub const WORK_DIR: &str = ".kiln";

/// Build-exclusion file consumed by the build engine.
pub const IGNORE_FILE: &str = ".dockerignore";

/// Backup location for a pre-existing exclusion file while a build runs.
pub const IGNORE_BACKUP_FILE: &str = ".dockerignore.kiln.bak";

/// Persisted weights manifest from the last successful weights-image build.
pub const WEIGHTS_MANIFEST_FILE: &str = ".kiln/cache/weights_manifest.json";

/// Bundled OpenAPI schema written after schema resolution.
pub const BUNDLED_SCHEMA_FILE: &str = ".kiln/openapi_schema.json";

/// Bundled schema helper shipped alongside the schema document.
pub const BUNDLED_SCHEMA_HELPER: &str = ".kiln/schema.py";

/// Fixed source epoch handed to the build engine for reproducible layer
/// timestamps (2024-01-01T00:00:00Z).
pub const BUILD_SOURCE_EPOCH: i64 = 1_704_067_200;

/// Get the exclusion file path for a source directory.
pub fn ignore_file(dir: &Path) -> PathBuf {
    dir.join(IGNORE_FILE)
}

/// Get the exclusion-file backup path for a source directory.
pub fn ignore_backup_file(dir: &Path) -> PathBuf {
    dir.join(IGNORE_BACKUP_FILE)
}

/// Get the weights manifest cache path for a source directory.
pub fn weights_manifest_file(dir: &Path) -> PathBuf {
    dir.join(WEIGHTS_MANIFEST_FILE)
}

/// Get the bundled schema path for a source directory.
pub fn bundled_schema_file(dir: &Path) -> PathBuf {
    dir.join(BUNDLED_SCHEMA_FILE)
}

/// Get the bundled schema helper path for a source directory.
pub fn bundled_schema_helper(dir: &Path) -> PathBuf {
    dir.join(BUNDLED_SCHEMA_HELPER)
}
