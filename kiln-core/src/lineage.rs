//! Base image lineage: remote manifest inspection.
//!
//! When a managed base image is used, the pipeline records which layer of
//! that base the final image sits on. The last layer's content digest and
//! index are read from the registry's manifest; nothing is downloaded and
//! nothing is cached across builds.

use crate::error::{KilnError, Result};
use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on one manifest fetch attempt.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries after the first failed fetch attempt.
const FETCH_RETRIES: u32 = 2;

/// Delay between fetch attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lineage of a managed base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImageLineage {
    pub reference: String,
    pub layer_count: usize,
    pub last_layer_digest: String,
    pub last_layer_index: usize,
}

/// Remote layer enumeration collaborator.
#[async_trait]
pub trait LayerInspector: Send + Sync {
    /// Layer content digests for an image reference, base-to-top order.
    async fn layer_digests(&self, reference: &str) -> Result<Vec<String>>;
}

/// Resolve the lineage of a base image via an inspector.
///
/// A base with zero layers is a hard failure; the digest is never read in
/// that case.
pub async fn resolve_lineage(
    inspector: &dyn LayerInspector,
    reference: &str,
) -> Result<BaseImageLineage> {
    let digests = inspector.layer_digests(reference).await?;
    if digests.is_empty() {
        return Err(KilnError::BaseImageEmpty { image: reference.to_string() });
    }

    let last_layer_index = digests.len() - 1;
    let last_layer_digest = digests[last_layer_index].clone();
    debug!(digest = %last_layer_digest, index = last_layer_index, "Last layer of base image");

    Ok(BaseImageLineage {
        reference: reference.to_string(),
        layer_count: digests.len(),
        last_layer_digest,
        last_layer_index,
    })
}

/// Registry-backed inspector with a per-attempt timeout and bounded retry
/// for transient network failures. A final failure is still fatal to the
/// build when a managed base image is in play.
#[derive(Debug, Clone, Default)]
pub struct RegistryInspector;

impl RegistryInspector {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_once(&self, reference: &Reference) -> anyhow::Result<Vec<String>> {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            ..Default::default()
        };
        let client = Client::new(config);

        let (manifest, _digest) = tokio::time::timeout(
            FETCH_TIMEOUT,
            client.pull_image_manifest(reference, &RegistryAuth::Anonymous),
        )
        .await
        .map_err(|_| anyhow::anyhow!("manifest fetch timed out after {:?}", FETCH_TIMEOUT))??;

        Ok(manifest.layers.into_iter().map(|layer| layer.digest).collect())
    }
}

#[async_trait]
impl LayerInspector for RegistryInspector {
    async fn layer_digests(&self, reference: &str) -> Result<Vec<String>> {
        let parsed: Reference =
            reference.parse().map_err(|e| KilnError::BaseImageInspectFailed {
                image: reference.to_string(),
                reason: format!("Invalid image reference: {}", e),
            })?;

        let mut last_error = None;
        for attempt in 0..=FETCH_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }
            match self.fetch_once(&parsed).await {
                Ok(digests) => return Ok(digests),
                Err(e) => {
                    warn!(attempt = attempt + 1, "Base image manifest fetch failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(KilnError::BaseImageInspectFailed {
            image: reference.to_string(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}
