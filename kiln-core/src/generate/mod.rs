//! Instruction generation collaborator boundary.
//!
//! A generator turns the model configuration into build instruction text:
//! either one unified set, or a weights/runner split for the separately
//! cached weights layer. The orchestrator drives it through this trait.

pub mod dockerfile;

pub use dockerfile::DockerfileGenerator;

use crate::error::Result;
use crate::weights::WeightsManifest;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Instruction sets for a separate-weights build.
#[derive(Debug, Clone)]
pub struct SplitInstructions {
    /// Instructions for the weights image.
    pub weights: String,

    /// Instructions for the runner image.
    pub runner: String,

    /// Exclusion-file body to apply while building the runner image, so the
    /// weight artifacts are not sent in its build context.
    pub runner_ignore_body: String,
}

/// Build instruction generator.
pub trait InstructionGenerator: Send {
    /// Strip shared libraries in the built environment.
    fn set_strip(&mut self, strip: bool);

    /// Precompile Python sources in the built environment.
    fn set_precompile(&mut self, precompile: bool);

    /// Accelerator (CUDA) base image selection ("auto", a version pin, or
    /// empty for the configuration default).
    fn set_accelerator_base(&mut self, selection: Option<String>);

    /// Force the managed Kiln base image on or off.
    fn set_managed_base_image(&mut self, enabled: bool);

    /// Whether the generated instructions start from a managed base image.
    fn is_using_managed_base_image(&self) -> bool;

    /// Reference of the managed base image the instructions start from.
    fn base_image(&self) -> Result<String>;

    /// Resolved build context directory.
    fn build_dir(&self) -> Result<PathBuf>;

    /// Named auxiliary build contexts.
    fn build_contexts(&mut self) -> Result<BTreeMap<String, String>>;

    /// Generate one unified instruction set.
    fn generate_unified(&mut self) -> Result<String>;

    /// Generate the weights/runner split for `image_name`.
    fn generate_split(&mut self, image_name: &str) -> Result<SplitInstructions>;

    /// Content manifest of the weight artifacts in the source tree.
    fn weights_manifest(&mut self) -> Result<WeightsManifest>;

    /// Remove temporary generation artifacts. Runs on every pipeline exit.
    fn cleanup(&mut self) -> Result<()>;
}
