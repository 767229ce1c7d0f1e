//! API schema resolution and validation.
//!
//! The schema describes the model's typed prediction API. It comes either
//! from a trusted file override or by introspecting the just-built image,
//! and is validated as an OpenAPI 3.0 document before labeling. The
//! resolved bytes are persisted to the bundled-schema path so later stages
//! read them without re-deriving.

use crate::error::{KilnError, Result};
use crate::paths;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Bound on schema extraction from a running container.
const SCHEMA_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on dependency-freeze extraction.
const FREEZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Schema introspection collaborator: extracts a machine-readable API
/// description and a dependency freeze from a built image.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Obtain the OpenAPI schema from the image. `accelerated` selects how
    /// the introspection container is run.
    async fn extract_schema(&self, image: &str, accelerated: bool) -> Result<Vec<u8>>;

    /// Obtain the frozen dependency list from the image.
    async fn dependency_freeze(&self, image: &str, fast: bool) -> Result<String>;
}

/// Introspector that runs the image via the container runtime.
#[derive(Debug, Clone)]
pub struct ContainerIntrospector {
    binary: PathBuf,
}

impl ContainerIntrospector {
    pub fn new() -> Self {
        Self { binary: PathBuf::from("docker") }
    }

    async fn run_in_image(
        &self,
        image: &str,
        accelerated: bool,
        command: &[&str],
        bound: Duration,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run").arg("--rm");
        if accelerated {
            cmd.arg("--gpus").arg("all");
        }
        cmd.arg(image).args(command).kill_on_drop(true);

        let output = timeout(bound, cmd.output())
            .await
            .map_err(|_| KilnError::SchemaUnavailable {
                reason: format!("Introspection of {} timed out after {:?}", image, bound),
            })?
            .map_err(|e| KilnError::SchemaUnavailable {
                reason: format!("Failed to run introspection container: {}", e),
            })?;

        if !output.status.success() {
            return Err(KilnError::SchemaUnavailable {
                reason: format!(
                    "Introspection of {} exited with {}: {}",
                    image,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

impl Default for ContainerIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaIntrospector for ContainerIntrospector {
    async fn extract_schema(&self, image: &str, accelerated: bool) -> Result<Vec<u8>> {
        info!(image = %image, "Introspecting image for API schema");
        self.run_in_image(
            image,
            accelerated,
            &["python", "-m", "kiln.runtime.dump_schema"],
            SCHEMA_TIMEOUT,
        )
        .await
    }

    async fn dependency_freeze(&self, image: &str, fast: bool) -> Result<String> {
        // Fast builds bundle the freeze at build time; otherwise ask pip.
        let command: &[&str] = if fast {
            &["cat", "/.kiln/pip_freeze.txt"]
        } else {
            &["pip", "freeze"]
        };
        let out = self.run_in_image(image, false, command, FREEZE_TIMEOUT).await?;
        Ok(String::from_utf8_lossy(&out).to_string())
    }
}

/// Resolve the schema for a built image: a file override is used verbatim,
/// otherwise the image is introspected. The bytes are persisted to the
/// bundled-schema path and then validated.
pub async fn resolve_schema(
    dir: &Path,
    image: &str,
    schema_file: Option<&Path>,
    accelerated: bool,
    introspector: &dyn SchemaIntrospector,
) -> Result<String> {
    let schema_bytes = match schema_file {
        Some(path) => {
            info!(path = %path.display(), "Validating model schema from file");
            std::fs::read(path).map_err(|e| KilnError::FileReadError {
                path: path.to_path_buf(),
                source: e,
            })?
        }
        None => {
            info!("Validating model schema");
            introspector.extract_schema(image, accelerated).await?
        }
    };

    let bundled = paths::bundled_schema_file(dir);
    if let Some(parent) = bundled.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| KilnError::IoError { path: parent.to_path_buf(), source: e })?;
    }
    std::fs::write(&bundled, &schema_bytes)
        .map_err(|e| KilnError::IoError { path: bundled.clone(), source: e })?;
    debug!(path = %bundled.display(), "Stored bundled schema");

    let schema_json = String::from_utf8_lossy(&schema_bytes).to_string();
    validate_schema(&schema_json)?;
    Ok(schema_json)
}

/// Validate a schema document as OpenAPI 3.0. The full document rides along
/// in the error because schema bugs are otherwise very hard to debug at
/// this stage.
pub fn validate_schema(document: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(document).map_err(|e| KilnError::SchemaInvalid {
            reason: format!("Not valid JSON: {}", e),
            document: document.to_string(),
        })?;

    let _: openapiv3::OpenAPI =
        serde_json::from_value(value).map_err(|e| KilnError::SchemaInvalid {
            reason: e.to_string(),
            document: document.to_string(),
        })?;
    Ok(())
}

/// Remove bundled schema files left behind by a previous build. Runs before
/// generation so a failed build never leaves a misleading artifact.
pub fn remove_stale_schema_files(dir: &Path) {
    let _ = std::fs::remove_file(paths::bundled_schema_file(dir));
    let _ = std::fs::remove_file(paths::bundled_schema_helper(dir));
}
