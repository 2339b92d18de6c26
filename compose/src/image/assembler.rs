//! Image assembly: artifacts plus role configuration in, image spec out.

use std::collections::BTreeSet;

use serde::Serialize;
use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, ArtifactCatalog, ImageOptions, Role, UserSpec};

use super::layers::{pack_layers, Layer};
use super::runtime_config::RuntimeConfig;
use super::scaffold::{find_trust_bundle, FilesystemScaffold, ScaffoldBuilder, TrustBundle};

/// Everything needed to write an image. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSpec {
    pub name: String,
    pub tag: String,
    pub role: Role,
    /// Upstream snapshot the artifacts were resolved from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub user: UserSpec,
    /// Artifact layers; the scaffold layer follows them
    pub layers: Vec<Layer>,
    pub scaffold: FilesystemScaffold,
    pub scaffold_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_bundle: Option<TrustBundle>,
    pub runtime: RuntimeConfig,
    /// Creation time, Unix seconds
    pub created: i64,
}

impl ImageSpec {
    /// `name:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Artifacts in layer order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.layers.iter().flat_map(|l| l.artifacts.iter())
    }

    pub fn layer_digests(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.digest.as_str()).collect()
    }

    /// Artifact layers plus the scaffold layer.
    pub fn total_layers(&self) -> usize {
        self.layers.len() + 1
    }
}

/// Assembles images for one catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct ImageAssembler {
    snapshot: Option<String>,
}

impl ImageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the snapshot of `catalog` in every assembled spec.
    pub fn for_catalog(catalog: &impl ArtifactCatalog) -> Self {
        Self::new().with_snapshot(catalog.snapshot())
    }

    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    pub fn assemble(&self, artifacts: &[Artifact], role: Role, options: &ImageOptions) -> Result<ImageSpec> {
        let mut effective = options.resolve(role)?;
        check_unique_names(artifacts)?;

        let trust_bundle = find_trust_bundle(artifacts)?;
        let runtime = RuntimeConfig::new(&effective, artifacts, trust_bundle.is_some())?;
        // extraConfig may have moved it
        effective.workdir = runtime.working_dir.clone();
        let scaffold = ScaffoldBuilder::new(&effective, &runtime.env)
            .with_trust_bundle(trust_bundle.as_ref())
            .build()?;
        let layers = pack_layers(artifacts, effective.max_layers)?;
        let scaffold_digest = scaffold.digest();

        tracing::info!(
            image = %effective.reference(),
            role = %role,
            artifacts = artifacts.len(),
            layers = layers.len() + 1,
            "Assembled image"
        );

        Ok(ImageSpec {
            name: effective.name,
            tag: effective.tag,
            role,
            snapshot: self.snapshot.clone(),
            user: effective.user,
            layers,
            scaffold,
            scaffold_digest,
            trust_bundle,
            runtime,
            created: effective.created,
        })
    }
}

/// Assemble without recording a snapshot.
pub fn assemble(artifacts: &[Artifact], role: Role, options: &ImageOptions) -> Result<ImageSpec> {
    ImageAssembler::new().assemble(artifacts, role, options)
}

fn check_unique_names(artifacts: &[Artifact]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for artifact in artifacts {
        if !seen.insert(artifact.name()) {
            return Err(StratumError::ConfigError(format!(
                "artifact '{}' appears more than once in the image",
                artifact.name()
            )));
        }
    }
    Ok(())
}
