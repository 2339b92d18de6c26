//! Project file (`stratum.yaml`).
//!
//! A project pins one upstream snapshot, declares its artifacts, optional
//! named source catalogs, the overlay chain, package sets and the images to
//! build from them.
//!
//! ```yaml
//! snapshot: "24.05"
//! artifacts:
//!   - name: base
//!     version: "1"
//!     recipe: { source: "src:base" }
//! overlays:
//!   - name: patch-base
//!     targets: [base]
//!     action: { kind: patch, patches: [fix.patch] }
//! sets:
//!   core: [base]
//! images:
//!   - name: api
//!     role: runtime
//!     sets: [core]
//!     options: { workdir: /srv }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use stratum_core::{ArtifactCatalog, ArtifactDef, Catalog, ImageOptions, Role};

use crate::image::{ImageAssembler, ImageSpec};
use crate::overlay::{ChainOptions, ChainReport, OverlayChain, RewriteAction, RewriteRule};
use crate::sets::{PackageSet, PackageSetRegistry, SetEntry, Sources};

/// Default project file name.
pub const PROJECT_FILE: &str = "stratum.yaml";

/// On-disk project layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectFile {
    pub snapshot: String,

    #[serde(default)]
    pub artifacts: Vec<ArtifactDef>,

    /// Additional catalogs referenced as `<source>:<artifact>` in sets
    #[serde(default)]
    pub sources: BTreeMap<String, SourceDecl>,

    /// Rewrite rules, applied in order
    #[serde(default)]
    pub overlays: Vec<OverlayDecl>,

    #[serde(default)]
    pub chain: ChainOptions,

    #[serde(default)]
    pub sets: BTreeMap<String, Vec<SetEntry>>,

    #[serde(default)]
    pub images: Vec<ImageDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceDecl {
    /// Snapshot of this source (defaults to the source name)
    #[serde(default)]
    pub snapshot: Option<String>,
    pub artifacts: Vec<ArtifactDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OverlayDecl {
    pub name: String,
    pub targets: Vec<String>,
    /// Passthrough keys the rule may change
    #[serde(default)]
    pub overrides: Vec<String>,
    pub action: RewriteAction,
}

impl OverlayDecl {
    pub fn to_rule(&self) -> RewriteRule {
        RewriteRule::new(self.name.clone(), self.targets.iter().cloned(), self.action.clone())
            .with_overrides(self.overrides.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageDecl {
    /// Target name; also the image name unless `options.name` is set
    pub name: String,
    pub role: Role,
    /// Package sets, concatenated in order
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default)]
    pub options: ImageOptions,
}

impl ImageDecl {
    /// Options with the image name filled in from the target name.
    pub fn image_options(&self) -> ImageOptions {
        let mut options = self.options.clone();
        if options.name.is_empty() {
            options.name = self.name.clone();
        }
        options
    }

    /// Case-sensitive substring match against the target name or role.
    pub fn matches(&self, filter: &str) -> bool {
        self.name.contains(filter) || self.role.as_str().contains(filter)
    }
}

/// A loaded project with its overlay chain already applied.
#[derive(Debug, Clone)]
pub struct Project {
    file: ProjectFile,
    base: Catalog,
    effective: Catalog,
    report: ChainReport,
    sources: Sources,
    registry: PackageSetRegistry,
}

impl Project {
    /// Load a project file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StratumError::ConfigError(format!("Failed to read project file {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loading project");
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: ProjectFile = serde_yaml::from_str(text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: ProjectFile) -> Result<Self> {
        let mut names = BTreeSet::new();
        for image in &file.images {
            if !names.insert(image.name.as_str()) {
                return Err(StratumError::ConfigError(format!(
                    "image '{}' is declared more than once",
                    image.name
                )));
            }
        }

        let base = Catalog::new(file.snapshot.clone(), file.artifacts.iter().cloned())?;

        let mut chain = OverlayChain::new().with_options(file.chain);
        for overlay in &file.overlays {
            chain.push(overlay.to_rule());
        }
        let overlaid = chain.apply(&base)?;

        let mut sources = Sources::new(overlaid.catalog.clone());
        for (name, decl) in &file.sources {
            let snapshot = decl.snapshot.clone().unwrap_or_else(|| name.clone());
            sources = sources.with_source(name.clone(), Catalog::new(snapshot, decl.artifacts.iter().cloned())?);
        }

        let mut registry = PackageSetRegistry::new();
        for (name, entries) in &file.sets {
            registry.define(PackageSet::new(name.clone(), entries.iter().cloned()))?;
        }

        tracing::info!(
            snapshot = %file.snapshot,
            artifacts = base.len(),
            overlays = chain.len(),
            sets = registry.len(),
            images = file.images.len(),
            "Loaded project"
        );

        Ok(Self {
            file,
            base,
            effective: overlaid.catalog,
            report: overlaid.report,
            sources,
            registry,
        })
    }

    pub fn snapshot(&self) -> &str {
        &self.file.snapshot
    }

    /// Catalog before overlays.
    pub fn base(&self) -> &Catalog {
        &self.base
    }

    /// Catalog after overlays.
    pub fn effective(&self) -> &Catalog {
        &self.effective
    }

    pub fn chain_report(&self) -> &ChainReport {
        &self.report
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn registry(&self) -> &PackageSetRegistry {
        &self.registry
    }

    pub fn images(&self) -> &[ImageDecl] {
        &self.file.images
    }

    pub fn image(&self, name: &str) -> Result<&ImageDecl> {
        self.file
            .images
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| StratumError::NotFound {
                kind: "image",
                name: name.to_string(),
            })
    }

    /// Images whose name or role contains `filter`; all images without one.
    pub fn select(&self, filter: Option<&str>) -> Vec<&ImageDecl> {
        self.file
            .images
            .iter()
            .filter(|i| filter.map_or(true, |f| i.matches(f)))
            .collect()
    }

    /// Run the full pipeline for one image.
    pub fn plan(&self, name: &str) -> Result<ImageSpec> {
        let decl = self.image(name)?;
        let span = tracing::info_span!("plan", image = %decl.name);
        let _enter = span.enter();

        let artifacts = self.registry.resolve_sets(decl.sets.as_slice(), &self.sources)?;
        let snapshot = self.sources.snapshot_for(&artifacts);
        if snapshot != self.effective.snapshot() {
            tracing::warn!(
                snapshot = %snapshot,
                "Image mixes artifacts from several snapshots; layer sharing is not guaranteed"
            );
        }
        ImageAssembler::new()
            .with_snapshot(snapshot)
            .assemble(&artifacts, decl.role, &decl.image_options())
    }

    /// Plan every image. One failing image does not stop the others.
    pub fn plan_all(&self) -> Vec<(String, Result<ImageSpec>)> {
        self.file
            .images
            .iter()
            .map(|i| (i.name.clone(), self.plan(&i.name)))
            .collect()
    }
}
