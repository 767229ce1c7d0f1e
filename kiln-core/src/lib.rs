//! Kiln Core Library
//!
//! Build orchestration pipeline for Kiln model images: turns a `kiln.yaml`
//! declaration into a labeled container image, with an optional separately
//! cached weights layer.

pub mod build;
pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod ignorefile;
pub mod labels;
pub mod lineage;
pub mod paths;
pub mod provenance;
pub mod schema;
pub mod weights;

// Re-export commonly used items
pub use build::{BuildRequest, Pipeline};
pub use config::Config;
pub use engine::{BuildEngine, DockerEngine, EngineBuildOptions, ProgressMode};
pub use error::{KilnError, Result};
pub use generate::{DockerfileGenerator, InstructionGenerator};
pub use lineage::{BaseImageLineage, LayerInspector, RegistryInspector};
pub use schema::{ContainerIntrospector, SchemaIntrospector};
pub use weights::WeightsManifest;
