//! Model configuration loaded from `kiln.yaml`.
//!
//! Full validation of the configuration format happens upstream of the build
//! pipeline; this struct is the interface the pipeline consumes. A trimmed
//! JSON snapshot of the whole configuration is attached to the built image
//! as a label.

use crate::error::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parsed `kiln.yaml` model declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build: BuildSection,

    /// Default image name for this model (e.g. "registry.example.com/owner/model").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Prediction entrypoint (e.g. "predict.py:Predictor").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predict: Option<String>,
}

/// Build environment declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Whether the model requires an accelerator-capable image.
    pub gpu: bool,

    /// Python interpreter version (e.g. "3.11").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,

    /// CUDA version pin for accelerator base image selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuda: Option<String>,

    /// Python packages to install ("name==version" pins).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub python_packages: Vec<String>,

    /// System packages to install with the distribution package manager.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,

    /// Arbitrary commands run during the environment build.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
}

impl Config {
    /// Load configuration from a `kiln.yaml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| KilnError::FileReadError {
                path: path.to_path_buf(),
                source: e,
            })?;
        serde_yaml::from_str(&content).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    /// Serialize the configuration to a whitespace-trimmed JSON snapshot.
    pub fn to_label_json(&self) -> Result<String> {
        let json = serde_json::to_string(self).map_err(|e| KilnError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        Ok(json.trim().to_string())
    }
}
