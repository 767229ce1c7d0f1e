//! Weights manifest for the separate-weights build cache.
//!
//! Weight artifacts are typically multi-gigabyte; the manifest is a
//! content-hash inventory of them, persisted after a successful weights-image
//! build and compared on the next run to decide whether that build can be
//! skipped entirely.

use crate::error::{KilnError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// File extensions treated as weight artifacts regardless of size.
const WEIGHT_EXTENSIONS: &[&str] = &[
    "safetensors", "ckpt", "pth", "pt", "bin", "gguf", "onnx", "h5", "pb", "tflite", "npz",
];

/// Files at or above this size are treated as weight artifacts even without
/// a known extension (1 GiB).
const WEIGHT_SIZE_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Content-addressed inventory of the weight artifacts in a source tree.
///
/// Two manifests are equal iff they describe the same set of tree-relative
/// paths with identical content hashes; insertion order never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsManifest {
    /// Tree-relative path -> SHA-256 content digest.
    pub files: BTreeMap<String, String>,
}

impl WeightsManifest {
    /// Scan a source tree for weight artifacts and hash them.
    ///
    /// The private working directory is excluded so previously bundled build
    /// state never counts as a weight.
    pub fn generate(dir: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();

        let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|name| name != crate::paths::WORK_DIR && name != ".git")
                .unwrap_or(true)
        });

        for entry in walker {
            let entry = entry.map_err(|e| KilnError::Internal(format!(
                "Failed to walk source tree: {}",
                e
            )))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !is_weight_file(path, entry.metadata().map(|m| m.len()).unwrap_or(0)) {
                continue;
            }

            let rel_path = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let digest = hash_file(path)?;
            debug!(path = %rel_path, digest = %digest, "Found weight artifact");
            files.insert(rel_path, digest);
        }

        Ok(Self { files })
    }

    /// Load a persisted manifest. Returns `None` when no manifest exists.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| KilnError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let manifest = serde_json::from_str(&content).map_err(|e| KilnError::Internal(format!(
            "Failed to parse weights manifest at {}: {}",
            path.display(),
            e
        )))?;
        Ok(Some(manifest))
    }

    /// Persist the manifest, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KilnError::ManifestPersistFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| KilnError::ManifestPersistFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        fs::write(path, content).map_err(|e| KilnError::ManifestPersistFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// True when the manifest describes no weight artifacts.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Decide whether a file is a weight artifact.
fn is_weight_file(path: &Path, size: u64) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if WEIGHT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    size >= WEIGHT_SIZE_THRESHOLD
}

/// Hash a file's contents with SHA-256, streaming in 8 KiB chunks.
fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| KilnError::FileReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| KilnError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest_from(pairs: &[(&str, &str)]) -> WeightsManifest {
        WeightsManifest {
            files: pairs.iter().map(|(p, h)| (p.to_string(), h.to_string())).collect(),
        }
    }

    #[test]
    fn test_equal_ignores_insertion_order() {
        let a = manifest_from(&[("a.safetensors", "h1"), ("b.safetensors", "h2")]);
        let b = manifest_from(&[("b.safetensors", "h2"), ("a.safetensors", "h1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_equal_empty_manifests() {
        assert_eq!(WeightsManifest::default(), WeightsManifest::default());
    }

    #[test]
    fn test_not_equal_on_differing_hash() {
        let a = manifest_from(&[("a.safetensors", "h1")]);
        let b = manifest_from(&[("a.safetensors", "h2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_not_equal_on_differing_path_set() {
        let a = manifest_from(&[("a.safetensors", "h1")]);
        let b = manifest_from(&[("a.safetensors", "h1"), ("b.safetensors", "h2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_finds_weight_extensions() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("model.safetensors"), "weights").unwrap();
        std::fs::write(temp.path().join("predict.py"), "code").unwrap();

        let manifest = WeightsManifest::generate(temp.path()).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert!(manifest.files.contains_key("model.safetensors"));
    }

    #[test]
    fn test_generate_skips_work_dir() {
        let temp = tempdir().unwrap();
        let work = temp.path().join(crate::paths::WORK_DIR).join("cache");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("stale.safetensors"), "old").unwrap();

        let manifest = WeightsManifest::generate(temp.path()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_generate_is_deterministic() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.pth"), "alpha").unwrap();
        std::fs::write(temp.path().join("b.pth"), "beta").unwrap();

        let first = WeightsManifest::generate(temp.path()).unwrap();
        let second = WeightsManifest::generate(temp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache").join("weights_manifest.json");
        let manifest = manifest_from(&[("model.bin", "abc123")]);

        manifest.save(&path).unwrap();
        let loaded = WeightsManifest::load(&path).unwrap().unwrap();
        assert_eq!(manifest, loaded);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let temp = tempdir().unwrap();
        let loaded = WeightsManifest::load(&temp.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }
}
