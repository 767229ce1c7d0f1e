//! Build engine collaborator boundary.
//!
//! The pipeline decides *when* and *how* to build; an engine performs the
//! actual image builds. All engine work is delegated through this trait so
//! the orchestrator can be exercised against a mock engine.

pub mod docker;

pub use docker::DockerEngine;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Progress output mode passed through to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressMode {
    #[default]
    Auto,
    Plain,
    Tty,
}

impl ProgressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressMode::Auto => "auto",
            ProgressMode::Plain => "plain",
            ProgressMode::Tty => "tty",
        }
    }
}

/// One engine build invocation.
#[derive(Debug, Clone)]
pub struct EngineBuildOptions {
    /// Model source directory the build runs against.
    pub source_dir: PathBuf,

    /// Build instruction text (Dockerfile contents), passed verbatim.
    pub instructions: String,

    /// Target image name.
    pub image_name: String,

    /// Build secrets ("id=NAME,src=path" forms).
    pub secrets: Vec<String>,

    /// Disable the engine's layer cache.
    pub no_cache: bool,

    /// Progress output mode.
    pub progress: ProgressMode,

    /// Fixed source epoch for reproducible layer timestamps.
    pub source_epoch: i64,

    /// Resolved build context directory.
    pub context_dir: PathBuf,

    /// Named auxiliary build contexts.
    pub build_contexts: BTreeMap<String, String>,
}

/// External build engine.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Build an image from instruction text.
    async fn build_image(&self, opts: &EngineBuildOptions) -> Result<()>;

    /// Whether an image is present in the engine's local store.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Attach the final label set and bundled schema files to an
    /// already-built image (post-build metadata amendment).
    async fn attach_labels_and_schema(
        &self,
        image: &str,
        labels: &BTreeMap<String, String>,
        schema_path: &Path,
        helper_path: &Path,
    ) -> Result<()>;
}
