//! Two-phase build orchestration.
//!
//! This is the top-level pipeline that turns a model declaration into a
//! labeled image: optional weights/runner split with manifest-based cache
//! reuse, schema resolution and validation, and label assembly. Actual
//! image builds, schema introspection, and registry inspection are
//! delegated to collaborators so the orchestration logic stays testable.

use crate::config::Config;
use crate::engine::{BuildEngine, EngineBuildOptions, ProgressMode};
use crate::error::{KilnError, Result};
use crate::generate::InstructionGenerator;
use crate::ignorefile::{self, IgnoreGuard, WEIGHTS_IGNORE_HEADER};
use crate::labels::{self, LabelContext};
use crate::lineage::LayerInspector;
use crate::paths;
use crate::schema::{self, SchemaIntrospector};
use crate::weights::WeightsManifest;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Immutable input to one build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Model source directory.
    pub dir: PathBuf,

    /// Target image name.
    pub image_name: String,

    /// Build secrets forwarded to the engine.
    pub secrets: Vec<String>,

    /// Disable the engine's layer cache.
    pub no_cache: bool,

    /// Build weight artifacts as a separately cached image.
    pub separate_weights: bool,

    /// Accelerator (CUDA) base image selection.
    pub accelerator_base: Option<String>,

    /// Force the managed base image on or off; `None` leaves the
    /// generator's default in place.
    pub managed_base_image: Option<bool>,

    /// Progress output mode.
    pub progress: ProgressMode,

    /// Schema file override; skips image introspection when set.
    pub schema_file: Option<PathBuf>,

    /// Raw Dockerfile override; skips all generation and weight separation.
    pub dockerfile: Option<PathBuf>,

    /// Strip shared libraries in the built environment.
    pub strip: bool,

    /// Precompile Python sources in the built environment.
    pub precompile: bool,

    /// Fast build: reuse prebuilt environment state where possible.
    pub fast: bool,

    /// Extra labels applied after all computed ones.
    pub annotations: BTreeMap<String, String>,

    /// Resolve the managed base image from the local store instead of the
    /// registry (consumed at generator construction).
    pub local_image: bool,
}

impl BuildRequest {
    /// A request with defaults for everything but the source directory and
    /// image name.
    pub fn new(dir: impl Into<PathBuf>, image_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            image_name: image_name.into(),
            secrets: Vec::new(),
            no_cache: false,
            separate_weights: false,
            accelerator_base: None,
            managed_base_image: None,
            progress: ProgressMode::Auto,
            schema_file: None,
            dockerfile: None,
            strip: false,
            precompile: false,
            fast: false,
            annotations: BTreeMap::new(),
            local_image: false,
        }
    }
}

/// The build pipeline with its external collaborators.
pub struct Pipeline<'a> {
    pub engine: &'a dyn BuildEngine,
    pub introspector: &'a dyn SchemaIntrospector,
    pub inspector: &'a dyn LayerInspector,
}

impl<'a> Pipeline<'a> {
    /// Build a model image from a configuration.
    ///
    /// Runs the whole pipeline: instruction generation (or the raw
    /// Dockerfile override), the weights/runner or unified builds, schema
    /// resolution and validation, and the post-build label amendment.
    #[instrument(skip(self, config, request, generator), fields(image = %request.image_name))]
    pub async fn run(
        &self,
        config: &Config,
        request: &BuildRequest,
        generator: &mut dyn InstructionGenerator,
    ) -> Result<()> {
        info!(
            "Building image from environment in kiln.yaml as {}",
            request.image_name
        );
        if request.fast {
            info!("Fast build enabled");
        }

        // A failed previous build must not leave a misleading schema behind.
        schema::remove_stale_schema_files(&request.dir);

        ignorefile::check_compatible_ignore_file(&request.dir)?;

        let mut base_image: Option<String> = None;

        if let Some(dockerfile) = &request.dockerfile {
            // Raw override: behave exactly like a direct engine invocation.
            let instructions =
                std::fs::read_to_string(dockerfile).map_err(|e| KilnError::FileReadError {
                    path: dockerfile.clone(),
                    source: e,
                })?;
            self.engine
                .build_image(&self.engine_options(
                    request,
                    instructions,
                    request.image_name.clone(),
                    request.dir.clone(),
                    BTreeMap::new(),
                ))
                .await?;
        } else {
            generator.set_strip(request.strip);
            generator.set_precompile(request.precompile);
            generator.set_accelerator_base(request.accelerator_base.clone());
            if let Some(managed) = request.managed_base_image {
                generator.set_managed_base_image(managed);
            }

            if generator.is_using_managed_base_image() {
                base_image = Some(generator.base_image().map_err(|e| {
                    KilnError::GenerationFailed {
                        reason: format!("Failed to get base image name: {}", e),
                    }
                })?);
            }

            // Generation artifacts must never leak into the source tree,
            // so cleanup runs regardless of how the phase ended.
            let result = self.run_generated(request, generator).await;
            if let Err(e) = generator.cleanup() {
                warn!("Error cleaning up instruction generator: {}", e);
            }
            result?;
        }

        let schema_json = schema::resolve_schema(
            &request.dir,
            &request.image_name,
            request.schema_file.as_deref(),
            config.build.gpu,
            self.introspector,
        )
        .await?;

        info!("Adding labels to image");

        let config_json = config.to_label_json()?;
        let dependency_freeze = self
            .introspector
            .dependency_freeze(&request.image_name, request.fast)
            .await?;

        let labels = labels::assemble(
            &request.dir,
            LabelContext {
                config_json: &config_json,
                schema_json: &schema_json,
                dependency_freeze: &dependency_freeze,
                base_image: base_image.as_deref(),
                annotations: &request.annotations,
            },
            self.inspector,
        )
        .await?;

        self.engine
            .attach_labels_and_schema(
                &request.image_name,
                &labels,
                &paths::bundled_schema_file(&request.dir),
                &paths::bundled_schema_helper(&request.dir),
            )
            .await
    }

    /// The generated-instructions path: unified build, or the weights and
    /// runner phases with manifest-based cache reuse.
    async fn run_generated(
        &self,
        request: &BuildRequest,
        generator: &mut dyn InstructionGenerator,
    ) -> Result<()> {
        let context_dir = generator.build_dir()?;
        let build_contexts = generator.build_contexts()?;

        if !request.separate_weights {
            let instructions = generator.generate_unified()?;
            return self
                .engine
                .build_image(&self.engine_options(
                    request,
                    instructions,
                    request.image_name.clone(),
                    context_dir,
                    build_contexts,
                ))
                .await;
        }

        let split = generator.generate_split(&request.image_name)?;
        let weights_image = format!("{}-weights", request.image_name);

        // The exclusion file is rewritten per phase; the guard restores the
        // user's file on every exit path, including engine failure.
        let mut guard = IgnoreGuard::acquire(&request.dir)?;

        let current = generator.weights_manifest()?;
        let cached = WeightsManifest::load(&paths::weights_manifest_file(&request.dir))
            .ok()
            .flatten();

        let unchanged = matches!(&cached, Some(prior) if *prior == current);
        // Manifest equality alone does not prove the image survived in the
        // engine's store; a missing image forces a rebuild.
        let reusable = unchanged
            && self.engine.image_exists(&weights_image).await.unwrap_or(false);

        if reusable {
            info!("Weights unchanged, skipping rebuild and using cached image");
        } else {
            guard.write(WEIGHTS_IGNORE_HEADER)?;
            self.engine
                .build_image(&self.engine_options(
                    request,
                    split.weights.clone(),
                    weights_image.clone(),
                    context_dir.clone(),
                    build_contexts.clone(),
                ))
                .await?;
            current.save(&paths::weights_manifest_file(&request.dir))?;
        }

        guard.write(&split.runner_ignore_body)?;
        self.engine
            .build_image(&self.engine_options(
                request,
                split.runner.clone(),
                request.image_name.clone(),
                context_dir,
                build_contexts,
            ))
            .await?;

        guard.restore()
    }

    fn engine_options(
        &self,
        request: &BuildRequest,
        instructions: String,
        image_name: String,
        context_dir: PathBuf,
        build_contexts: BTreeMap<String, String>,
    ) -> EngineBuildOptions {
        EngineBuildOptions {
            source_dir: request.dir.clone(),
            instructions,
            image_name,
            secrets: request.secrets.clone(),
            no_cache: request.no_cache,
            progress: request.progress,
            source_epoch: paths::BUILD_SOURCE_EPOCH,
            context_dir,
            build_contexts,
        }
    }
}
