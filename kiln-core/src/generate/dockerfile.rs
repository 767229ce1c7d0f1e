//! Dockerfile generator for model images.
//!
//! Renders build instructions from the `kiln.yaml` declaration: base image
//! selection (managed Kiln base, accelerator base, or plain Python),
//! system and Python packages, user run commands, and the weights/runner
//! split. Python requirements are staged in a scratch directory exposed as
//! an auxiliary build context so nothing is written into the source tree.

use super::{InstructionGenerator, SplitInstructions};
use crate::config::Config;
use crate::error::{KilnError, Result};
use crate::weights::WeightsManifest;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Registry prefix for managed Kiln base images.
const MANAGED_BASE_REGISTRY: &str = "registry.kiln.build/kiln-base";

/// Python version used when the configuration does not pin one.
const DEFAULT_PYTHON_VERSION: &str = "3.11";

/// Auxiliary build context holding the rendered requirements file.
const REQUIREMENTS_CONTEXT: &str = "kiln-requirements";

/// Production instruction generator.
pub struct DockerfileGenerator {
    config: Config,
    dir: PathBuf,
    fast: bool,
    local_image: bool,
    strip: bool,
    precompile: bool,
    accelerator_base: Option<String>,
    use_managed_base: bool,
    scratch: Option<TempDir>,
    manifest: Option<WeightsManifest>,
}

impl DockerfileGenerator {
    pub fn new(config: Config, dir: &Path, fast: bool, local_image: bool) -> Result<Self> {
        Ok(Self {
            config,
            dir: dir.to_path_buf(),
            fast,
            local_image,
            strip: false,
            precompile: false,
            accelerator_base: None,
            // Accelerator models default to the managed base, which carries
            // the CUDA toolchain prebuilt.
            use_managed_base: true,
            scratch: None,
            manifest: None,
        })
    }

    fn python_version(&self) -> &str {
        self.config.build.python_version.as_deref().unwrap_or(DEFAULT_PYTHON_VERSION)
    }

    /// Resolve the image the generated instructions start from.
    fn resolve_base(&self) -> String {
        if self.use_managed_base {
            let mut tag = format!("python{}", self.python_version());
            if self.config.build.gpu {
                let cuda = self
                    .accelerator_base
                    .as_deref()
                    .filter(|s| !s.is_empty() && *s != "auto")
                    .or(self.config.build.cuda.as_deref())
                    .unwrap_or("12.1");
                let _ = write!(tag, "-cuda{}", cuda);
            }
            if self.local_image {
                format!("kiln-base:{}", tag)
            } else {
                format!("{}:{}", MANAGED_BASE_REGISTRY, tag)
            }
        } else if self.config.build.gpu {
            let cuda = self.config.build.cuda.as_deref().unwrap_or("12.1");
            format!("nvidia/cuda:{}-cudnn-runtime-ubuntu22.04", cuda)
        } else {
            format!("python:{}-slim", self.python_version())
        }
    }

    /// Stage the requirements file in the scratch directory, creating it on
    /// first use.
    fn stage_requirements(&mut self) -> Result<Option<PathBuf>> {
        if self.config.build.python_packages.is_empty() {
            return Ok(None);
        }
        if self.scratch.is_none() {
            self.scratch = Some(TempDir::new().map_err(|e| KilnError::GenerationFailed {
                reason: format!("Failed to create scratch directory: {}", e),
            })?);
        }
        let scratch = self.scratch.as_ref().unwrap().path();
        let requirements = scratch.join("requirements.txt");
        let body = self.config.build.python_packages.join("\n") + "\n";
        std::fs::write(&requirements, body).map_err(|e| KilnError::GenerationFailed {
            reason: format!("Failed to stage requirements: {}", e),
        })?;
        debug!(path = %requirements.display(), "Staged requirements file");
        Ok(Some(requirements))
    }

    /// Shared environment-setup block for unified and runner instructions.
    fn render_environment(&mut self) -> Result<String> {
        let mut out = String::new();

        if !self.config.build.system_packages.is_empty() {
            let _ = writeln!(
                out,
                "RUN apt-get update -qq && apt-get install -qqy {} && rm -rf /var/lib/apt/lists/*",
                self.config.build.system_packages.join(" ")
            );
        }

        if self.stage_requirements()?.is_some() {
            let _ = writeln!(
                out,
                "RUN --mount=type=bind,from={},source=requirements.txt,target=/tmp/requirements.txt \\",
                REQUIREMENTS_CONTEXT
            );
            let _ = writeln!(out, "    pip install --no-cache-dir -r /tmp/requirements.txt");
        }

        for command in &self.config.build.run {
            let _ = writeln!(out, "RUN {}", command);
        }

        if self.fast {
            let _ = writeln!(out, "ENV KILN_FAST_BUILD=1");
        }
        Ok(out)
    }

    /// Final application block: source copy, entrypoint, optional
    /// post-install steps.
    fn render_app(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "COPY . /src");
        let _ = writeln!(out, "WORKDIR /src");
        if self.precompile {
            let _ = writeln!(out, "RUN python -m compileall -q /src");
        }
        if self.strip {
            let _ = writeln!(
                out,
                "RUN find / -type f -name '*.so*' -not -path '/proc/*' -exec strip --strip-unneeded {{}} \\; 2>/dev/null || true"
            );
        }
        let _ = writeln!(out, "ENTRYPOINT [\"python\", \"-m\", \"kiln.runtime.server\"]");
        out
    }

    fn manifest_cached(&mut self) -> Result<&WeightsManifest> {
        if self.manifest.is_none() {
            self.manifest = Some(WeightsManifest::generate(&self.dir)?);
        }
        Ok(self.manifest.as_ref().unwrap())
    }
}

impl InstructionGenerator for DockerfileGenerator {
    fn set_strip(&mut self, strip: bool) {
        self.strip = strip;
    }

    fn set_precompile(&mut self, precompile: bool) {
        self.precompile = precompile;
    }

    fn set_accelerator_base(&mut self, selection: Option<String>) {
        self.accelerator_base = selection;
    }

    fn set_managed_base_image(&mut self, enabled: bool) {
        self.use_managed_base = enabled;
    }

    fn is_using_managed_base_image(&self) -> bool {
        self.use_managed_base
    }

    fn base_image(&self) -> Result<String> {
        if !self.use_managed_base {
            return Err(KilnError::GenerationFailed {
                reason: "No managed base image in use".to_string(),
            });
        }
        Ok(self.resolve_base())
    }

    fn build_dir(&self) -> Result<PathBuf> {
        Ok(self.dir.clone())
    }

    fn build_contexts(&mut self) -> Result<BTreeMap<String, String>> {
        let mut contexts = BTreeMap::new();
        if let Some(requirements) = self.stage_requirements()? {
            let parent = requirements
                .parent()
                .unwrap_or(Path::new("."))
                .to_string_lossy()
                .to_string();
            contexts.insert(REQUIREMENTS_CONTEXT.to_string(), parent);
        }
        Ok(contexts)
    }

    fn generate_unified(&mut self) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "# syntax=docker/dockerfile:1");
        let _ = writeln!(out, "FROM {}", self.resolve_base());
        out.push_str(&self.render_environment()?);
        out.push_str(&self.render_app());
        Ok(out)
    }

    fn generate_split(&mut self, image_name: &str) -> Result<SplitInstructions> {
        let weight_paths: Vec<String> =
            self.manifest_cached()?.files.keys().cloned().collect();

        let mut weights = String::new();
        let _ = writeln!(weights, "# syntax=docker/dockerfile:1");
        let _ = writeln!(weights, "FROM scratch");
        for path in &weight_paths {
            let _ = writeln!(weights, "COPY {} /src/{}", path, path);
        }

        let mut runner = String::new();
        let _ = writeln!(runner, "# syntax=docker/dockerfile:1");
        let _ = writeln!(runner, "FROM {}-weights AS weights", image_name);
        let _ = writeln!(runner, "FROM {}", self.resolve_base());
        runner.push_str(&self.render_environment()?);
        if !weight_paths.is_empty() {
            let _ = writeln!(runner, "COPY --from=weights /src /src");
        }
        runner.push_str(&self.render_app());

        // The runner context must not carry the weight artifacts; they come
        // from the weights image.
        let mut runner_ignore_body = String::from("# generated by kiln\n");
        for path in &weight_paths {
            runner_ignore_body.push_str(path);
            runner_ignore_body.push('\n');
        }

        Ok(SplitInstructions { weights, runner, runner_ignore_body })
    }

    fn weights_manifest(&mut self) -> Result<WeightsManifest> {
        Ok(self.manifest_cached()?.clone())
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            scratch.close().map_err(|e| KilnError::IoError { path, source: e })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_with_packages() -> Config {
        let mut config = Config::default();
        config.build.python_version = Some("3.11".to_string());
        config.build.python_packages = vec!["torch==2.3.0".to_string()];
        config.build.system_packages = vec!["libgl1".to_string()];
        config
    }

    #[test]
    fn test_unified_uses_managed_base_by_default() {
        let temp = tempdir().unwrap();
        let mut generator =
            DockerfileGenerator::new(config_with_packages(), temp.path(), false, false).unwrap();
        let instructions = generator.generate_unified().unwrap();
        assert!(instructions.contains(MANAGED_BASE_REGISTRY));
        assert!(instructions.contains("pip install"));
        assert!(instructions.contains("apt-get install -qqy libgl1"));
        generator.cleanup().unwrap();
    }

    #[test]
    fn test_plain_python_base_when_managed_disabled() {
        let temp = tempdir().unwrap();
        let mut generator =
            DockerfileGenerator::new(config_with_packages(), temp.path(), false, false).unwrap();
        generator.set_managed_base_image(false);
        let instructions = generator.generate_unified().unwrap();
        assert!(instructions.contains("FROM python:3.11-slim"));
        assert!(generator.base_image().is_err());
        generator.cleanup().unwrap();
    }

    #[test]
    fn test_accelerator_base_tag_includes_cuda() {
        let temp = tempdir().unwrap();
        let mut config = config_with_packages();
        config.build.gpu = true;
        config.build.cuda = Some("12.4".to_string());
        let generator = DockerfileGenerator::new(config, temp.path(), false, false).unwrap();
        let base = generator.base_image().unwrap();
        assert!(base.contains("cuda12.4"), "unexpected base: {}", base);
    }

    #[test]
    fn test_split_excludes_weights_from_runner_context() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("model.safetensors"), "weights").unwrap();
        std::fs::write(temp.path().join("predict.py"), "code").unwrap();

        let mut generator =
            DockerfileGenerator::new(Config::default(), temp.path(), false, false).unwrap();
        let split = generator.generate_split("example/model").unwrap();

        assert!(split.weights.contains("COPY model.safetensors /src/model.safetensors"));
        assert!(split.runner.contains("FROM example/model-weights AS weights"));
        assert!(split.runner_ignore_body.contains("model.safetensors"));
        assert!(!split.runner_ignore_body.contains("predict.py"));
    }

    #[test]
    fn test_strip_and_precompile_render_steps() {
        let temp = tempdir().unwrap();
        let mut generator =
            DockerfileGenerator::new(Config::default(), temp.path(), false, false).unwrap();
        generator.set_strip(true);
        generator.set_precompile(true);
        let instructions = generator.generate_unified().unwrap();
        assert!(instructions.contains("compileall"));
        assert!(instructions.contains("strip --strip-unneeded"));
    }

    #[test]
    fn test_cleanup_removes_scratch_dir() {
        let temp = tempdir().unwrap();
        let mut generator =
            DockerfileGenerator::new(config_with_packages(), temp.path(), false, false).unwrap();
        let contexts = generator.build_contexts().unwrap();
        let scratch = PathBuf::from(contexts.get(REQUIREMENTS_CONTEXT).unwrap());
        assert!(scratch.exists());
        generator.cleanup().unwrap();
        assert!(!scratch.exists());
    }
}
