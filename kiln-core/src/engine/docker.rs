//! Docker/BuildKit build engine.
//!
//! Shells out to the `docker` binary. Instruction text is streamed over
//! stdin so no Dockerfile is ever written into the source tree; build output
//! goes straight to the user's terminal.

use super::{BuildEngine, EngineBuildOptions};
use crate::error::{KilnError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Build engine backed by the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: PathBuf,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self { binary: PathBuf::from("docker") }
    }

    /// Use a specific docker binary.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Run a prepared build command, feeding `instructions` over stdin.
    async fn run_build(
        &self,
        mut cmd: Command,
        instructions: &str,
        image: &str,
    ) -> Result<()> {
        cmd.stdin(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| KilnError::BuildFailed {
            image: image.to_string(),
            reason: format!("Failed to spawn {}: {}", self.binary.display(), e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(instructions.as_bytes()).await.map_err(|e| {
                KilnError::BuildFailed {
                    image: image.to_string(),
                    reason: format!("Failed to write build instructions: {}", e),
                }
            })?;
        }

        let status = child.wait().await.map_err(|e| KilnError::BuildFailed {
            image: image.to_string(),
            reason: format!("Failed to wait for build engine: {}", e),
        })?;

        if !status.success() {
            return Err(KilnError::BuildFailed {
                image: image.to_string(),
                reason: format!("Build engine exited with {}", status),
            });
        }
        Ok(())
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildEngine for DockerEngine {
    async fn build_image(&self, opts: &EngineBuildOptions) -> Result<()> {
        info!(image = %opts.image_name, "Invoking build engine");

        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&opts.source_dir)
            .env("SOURCE_DATE_EPOCH", opts.source_epoch.to_string())
            .arg("buildx")
            .arg("build")
            .arg("--file")
            .arg("-")
            .arg("--tag")
            .arg(&opts.image_name)
            .arg("--progress")
            .arg(opts.progress.as_str())
            .arg("--load");

        if opts.no_cache {
            cmd.arg("--no-cache");
        }
        for secret in &opts.secrets {
            cmd.arg("--secret").arg(secret);
        }
        for (name, path) in &opts.build_contexts {
            cmd.arg("--build-context").arg(format!("{}={}", name, path));
        }
        cmd.arg(&opts.context_dir);

        debug!(context = %opts.context_dir.display(), "Build context resolved");
        self.run_build(cmd, &opts.instructions, &opts.image_name).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = Command::new(&self.binary)
            .arg("image")
            .arg("inspect")
            .arg(image)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| KilnError::Internal(format!("Failed to run docker: {}", e)))?;
        Ok(output.status.success())
    }

    async fn attach_labels_and_schema(
        &self,
        image: &str,
        labels: &BTreeMap<String, String>,
        schema_path: &Path,
        helper_path: &Path,
    ) -> Result<()> {
        info!(image = %image, labels = labels.len(), "Attaching labels to image");

        // Rebuild from the image itself with the bundled files copied in;
        // the engine's cache makes this a metadata-only amendment.
        let context_dir = schema_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut instructions = format!("FROM {}\n", image);
        for bundled in [schema_path, helper_path] {
            if bundled.exists() {
                if let Some(name) = bundled.file_name().and_then(|n| n.to_str()) {
                    instructions.push_str(&format!("COPY {} /.kiln/{}\n", name, name));
                }
            }
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("buildx")
            .arg("build")
            .arg("--file")
            .arg("-")
            .arg("--tag")
            .arg(image)
            .arg("--progress")
            .arg("plain")
            .arg("--load");
        for (key, value) in labels {
            cmd.arg("--label").arg(format!("{}={}", key, value));
        }
        cmd.arg(&context_dir);

        self.run_build(cmd, &instructions, image)
            .await
            .map_err(|e| KilnError::LabelAttachFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })
    }
}
