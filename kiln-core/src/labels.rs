//! Image label assembly.
//!
//! Labels are assembled in a deterministic order; later entries may
//! overwrite earlier keys, and caller-supplied annotations are applied last
//! so users can override anything, including the namespaced internals.

use crate::error::Result;
use crate::lineage::{self, LayerInspector};
use crate::provenance::{self, Provenance};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Namespace prefix for computed Kiln labels.
pub const LABEL_NAMESPACE: &str = "run.kiln.";

pub const VERSION_LABEL: &str = "run.kiln.version";
pub const CONFIG_LABEL: &str = "run.kiln.config";
pub const SCHEMA_LABEL: &str = "run.kiln.openapi_schema";
pub const FREEZE_LABEL: &str = "run.kiln.pip_freeze";
pub const HAS_INIT_LABEL: &str = "run.kiln.has_init";
pub const BASE_IMAGE_NAME_LABEL: &str = "run.kiln.base-image-name";
pub const BASE_IMAGE_LAST_LAYER_SHA_LABEL: &str = "run.kiln.base-image-last-layer-sha";
pub const BASE_IMAGE_LAST_LAYER_IDX_LABEL: &str = "run.kiln.base-image-last-layer-idx";

/// Standard open provenance keys.
pub const OCI_REVISION_LABEL: &str = "org.opencontainers.image.revision";
pub const OCI_VERSION_LABEL: &str = "org.opencontainers.image.version";

/// Inputs computed by earlier pipeline stages.
#[derive(Debug)]
pub struct LabelContext<'a> {
    /// Whitespace-trimmed JSON snapshot of the configuration.
    pub config_json: &'a str,

    /// Validated schema document.
    pub schema_json: &'a str,

    /// Frozen dependency list extracted from the image.
    pub dependency_freeze: &'a str,

    /// Managed base image reference, when one was used.
    pub base_image: Option<&'a str>,

    /// Caller-supplied annotations, applied last.
    pub annotations: &'a BTreeMap<String, String>,
}

/// Assemble the final label set for an image.
pub async fn assemble(
    dir: &Path,
    ctx: LabelContext<'_>,
    inspector: &dyn LayerInspector,
) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();

    labels.insert(VERSION_LABEL.to_string(), env!("CARGO_PKG_VERSION").to_string());
    labels.insert(CONFIG_LABEL.to_string(), ctx.config_json.to_string());
    labels.insert(SCHEMA_LABEL.to_string(), ctx.schema_json.to_string());
    labels.insert(FREEZE_LABEL.to_string(), ctx.dependency_freeze.to_string());
    // Marks the image as carrying the managed init entrypoint, so runtimes
    // can decide how (or whether) to shim it.
    labels.insert(HAS_INIT_LABEL.to_string(), "true".to_string());

    if let Some(base_image) = ctx.base_image {
        labels.insert(BASE_IMAGE_NAME_LABEL.to_string(), base_image.to_string());

        let lineage = lineage::resolve_lineage(inspector, base_image).await?;
        labels.insert(
            BASE_IMAGE_LAST_LAYER_SHA_LABEL.to_string(),
            lineage.last_layer_digest.clone(),
        );
        labels.insert(
            BASE_IMAGE_LAST_LAYER_IDX_LABEL.to_string(),
            lineage.last_layer_index.to_string(),
        );
    }

    match provenance::head_commit(dir).await {
        Provenance::Resolved(commit) => {
            labels.insert(OCI_REVISION_LABEL.to_string(), commit);
        }
        Provenance::NotApplicable => debug!("No Git work tree; omitting revision label"),
        Provenance::Unavailable(e) => info!("Unable to determine Git commit: {}", e),
    }

    match provenance::describe_tag(dir).await {
        Provenance::Resolved(tag) => {
            labels.insert(OCI_VERSION_LABEL.to_string(), tag);
        }
        Provenance::NotApplicable => debug!("No Git work tree; omitting version label"),
        Provenance::Unavailable(e) => info!("Unable to determine Git tag: {}", e),
    }

    for (key, value) in ctx.annotations {
        labels.insert(key.clone(), value.clone());
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as KilnResult;
    use async_trait::async_trait;

    struct NoInspector;

    #[async_trait]
    impl LayerInspector for NoInspector {
        async fn layer_digests(&self, _reference: &str) -> KilnResult<Vec<String>> {
            panic!("inspector must not be called without a base image");
        }
    }

    struct ThreeLayerInspector;

    #[async_trait]
    impl LayerInspector for ThreeLayerInspector {
        async fn layer_digests(&self, _reference: &str) -> KilnResult<Vec<String>> {
            Ok(vec!["sha256:a".into(), "sha256:b".into(), "sha256:c".into()])
        }
    }

    fn base_context<'a>(annotations: &'a BTreeMap<String, String>) -> LabelContext<'a> {
        LabelContext {
            config_json: "{}",
            schema_json: "{\"openapi\":\"3.0.2\"}",
            dependency_freeze: "torch==2.3.0",
            base_image: None,
            annotations,
        }
    }

    #[tokio::test]
    async fn test_no_base_image_keys_without_managed_base() {
        let annotations = BTreeMap::new();
        let temp = tempfile::tempdir().unwrap();
        let labels = assemble(temp.path(), base_context(&annotations), &NoInspector)
            .await
            .unwrap();

        assert_eq!(labels.get(HAS_INIT_LABEL).map(String::as_str), Some("true"));
        assert!(labels.contains_key(VERSION_LABEL));
        assert!(!labels.contains_key(BASE_IMAGE_NAME_LABEL));
        assert!(!labels.contains_key(BASE_IMAGE_LAST_LAYER_SHA_LABEL));
    }

    #[tokio::test]
    async fn test_base_image_lineage_labels() {
        let annotations = BTreeMap::new();
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = base_context(&annotations);
        ctx.base_image = Some("registry.kiln.build/kiln-base:python3.11");

        let labels = assemble(temp.path(), ctx, &ThreeLayerInspector).await.unwrap();
        assert_eq!(
            labels.get(BASE_IMAGE_LAST_LAYER_SHA_LABEL).map(String::as_str),
            Some("sha256:c")
        );
        assert_eq!(
            labels.get(BASE_IMAGE_LAST_LAYER_IDX_LABEL).map(String::as_str),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_annotations_overwrite_computed_labels() {
        let mut annotations = BTreeMap::new();
        annotations.insert(HAS_INIT_LABEL.to_string(), "false".to_string());
        annotations.insert("org.example.team".to_string(), "vision".to_string());

        let temp = tempfile::tempdir().unwrap();
        let labels = assemble(temp.path(), base_context(&annotations), &NoInspector)
            .await
            .unwrap();

        assert_eq!(labels.get(HAS_INIT_LABEL).map(String::as_str), Some("false"));
        assert_eq!(labels.get("org.example.team").map(String::as_str), Some("vision"));
    }
}
