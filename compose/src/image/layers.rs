//! Layer bin-packing.
//!
//! The partition depends only on the artifact sequence and the layer
//! budget. One slot of the budget is reserved for the scaffold layer, which
//! the assembler appends last. Artifacts take one layer each in order; when
//! they outnumber the remaining slots, the final slot holds the overflow.
//! Any prefix shorter than the slot count therefore maps to the same
//! leading layers in every image.

use serde::Serialize;
use sha2::{Digest, Sha256};
use stratum_core::error::{Result, StratumError};
use stratum_core::Artifact;

const LAYER_DIGEST_DOMAIN: &str = "stratum-layer-v1";

/// An ordered group of artifacts shipped as one image layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
    /// `sha256:<hex>` over the ordered member fingerprints
    pub digest: String,
    pub artifacts: Vec<Artifact>,
}

impl Layer {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        let digest = layer_digest(&artifacts);
        Self { digest, artifacts }
    }

    pub fn names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name()).collect()
    }
}

/// Number of artifact layers available under a budget.
pub fn artifact_slots(max_layers: usize) -> usize {
    max_layers.saturating_sub(1)
}

/// Partition `artifacts` into at most `max_layers - 1` layers.
pub fn pack_layers(artifacts: &[Artifact], max_layers: usize) -> Result<Vec<Layer>> {
    let slots = artifact_slots(max_layers);
    if slots == 0 {
        return Err(StratumError::ConfigError(format!(
            "layer budget {} leaves no room for artifacts",
            max_layers
        )));
    }

    let layers: Vec<Layer> = if artifacts.len() <= slots {
        artifacts.iter().map(|a| Layer::new(vec![a.clone()])).collect()
    } else {
        let (singles, rest) = artifacts.split_at(slots - 1);
        singles
            .iter()
            .map(|a| Layer::new(vec![a.clone()]))
            .chain(std::iter::once(Layer::new(rest.to_vec())))
            .collect()
    };

    tracing::debug!(
        artifacts = artifacts.len(),
        layers = layers.len(),
        max_layers,
        "Packed artifact layers"
    );
    Ok(layers)
}

fn layer_digest(artifacts: &[Artifact]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(LAYER_DIGEST_DOMAIN.as_bytes());
    hasher.update(b"\n");
    for artifact in artifacts {
        hasher.update(artifact.name().as_bytes());
        hasher.update(b" ");
        hasher.update(artifact.fingerprint.as_str().as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
