//! Build command implementation for the Kiln CLI.
//!
//! Loads `kiln.yaml`, wires up the production collaborators, and hands off
//! to the core pipeline.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::build::{BuildRequest, Pipeline};
use kiln_core::config::Config;
use kiln_core::engine::{DockerEngine, ProgressMode};
use kiln_core::generate::DockerfileGenerator;
use kiln_core::lineage::RegistryInspector;
use kiln_core::schema::ContainerIntrospector;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Arguments collected from the command line.
pub struct BuildArgs {
    pub dir: PathBuf,
    pub tag: Option<String>,
    pub secrets: Vec<String>,
    pub no_cache: bool,
    pub separate_weights: bool,
    pub use_cuda_base_image: Option<String>,
    pub use_kiln_base_image: Option<bool>,
    pub progress: String,
    pub openapi_schema: Option<PathBuf>,
    pub dockerfile: Option<PathBuf>,
    pub strip: bool,
    pub precompile: bool,
    pub fast: bool,
    pub annotations: Vec<String>,
    pub local_image: bool,
}

/// Builds a model image from the declaration in `kiln.yaml`.
pub async fn build(args: BuildArgs) -> Result<()> {
    let dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("Source directory not found: {}", args.dir.display()))?;

    let config_path = dir.join("kiln.yaml");
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let image_name = args
        .tag
        .or_else(|| config.image.clone())
        .context("No image name: pass --tag or set `image` in kiln.yaml")?;

    let mut request = BuildRequest::new(&dir, image_name.as_str());
    request.secrets = args.secrets;
    request.no_cache = args.no_cache;
    request.separate_weights = args.separate_weights;
    request.accelerator_base = args.use_cuda_base_image;
    request.managed_base_image = args.use_kiln_base_image;
    request.progress = parse_progress(&args.progress)?;
    request.schema_file = args.openapi_schema;
    request.dockerfile = args.dockerfile;
    request.strip = args.strip;
    request.precompile = args.precompile;
    request.fast = args.fast;
    request.annotations = parse_annotations(&args.annotations)?;
    request.local_image = args.local_image;

    let engine = DockerEngine::new();
    let introspector = ContainerIntrospector::new();
    let inspector = RegistryInspector::new();
    let mut generator =
        DockerfileGenerator::new(config.clone(), &dir, request.fast, request.local_image)
            .context("Failed to create instruction generator")?;

    let pipeline = Pipeline {
        engine: &engine,
        introspector: &introspector,
        inspector: &inspector,
    };
    pipeline
        .run(&config, &request, &mut generator)
        .await
        .with_context(|| format!("Failed to build {}", image_name))?;

    println!();
    println!("{} {}", "Image built:".green().bold(), image_name.cyan());
    println!("  Run with: {}", format!("docker run -it {}", image_name).cyan());
    Ok(())
}

/// Parses a progress mode flag value.
fn parse_progress(value: &str) -> Result<ProgressMode> {
    match value {
        "auto" => Ok(ProgressMode::Auto),
        "plain" => Ok(ProgressMode::Plain),
        "tty" => Ok(ProgressMode::Tty),
        other => anyhow::bail!("Invalid progress mode: {} (expected auto, plain, or tty)", other),
    }
}

/// Parses KEY=VALUE annotation flags.
fn parse_annotations(values: &[String]) -> Result<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    for value in values {
        let (key, val) = value
            .split_once('=')
            .with_context(|| format!("Invalid annotation (expected KEY=VALUE): {}", value))?;
        annotations.insert(key.to_string(), val.to_string());
    }
    Ok(annotations)
}
