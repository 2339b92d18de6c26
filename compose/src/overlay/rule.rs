//! Rewrite rules: named, targeted transformations over a catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, ArtifactDef, Catalog};

/// Produces a replacement definition for one target artifact.
///
/// Implementations must be pure functions of the catalog-so-far and their own
/// pinned inputs: no clock, no network.
pub trait Rewrite: Send + Sync {
    fn rewrite(&self, catalog: &Catalog, target: &Artifact) -> Result<ArtifactDef>;

    /// Short human-readable description used in logs and reports.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> Rewrite for F
where
    F: Fn(&Catalog, &Artifact) -> Result<ArtifactDef> + Send + Sync,
{
    fn rewrite(&self, catalog: &Catalog, target: &Artifact) -> Result<ArtifactDef> {
        self(catalog, target)
    }
}

/// A named rewrite applied to a fixed list of target artifacts.
#[derive(Clone)]
pub struct RewriteRule {
    name: String,
    targets: Vec<String>,
    /// Passthrough keys this rule is allowed to change or drop
    overrides: BTreeSet<String>,
    rewrite: Arc<dyn Rewrite>,
}

impl RewriteRule {
    pub fn new<I, S>(name: impl Into<String>, targets: I, rewrite: impl Rewrite + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            overrides: BTreeSet::new(),
            rewrite: Arc::new(rewrite),
        }
    }

    /// Declare passthrough keys this rule intentionally overrides.
    pub fn with_overrides<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn overrides(&self) -> &BTreeSet<String> {
        &self.overrides
    }

    pub fn describe(&self) -> String {
        self.rewrite.describe()
    }

    /// Run the rewrite for one target and validate the interface it exposes.
    pub(crate) fn rewrite_target(&self, catalog: &Catalog, target: &Artifact) -> Result<ArtifactDef> {
        let replacement = self.rewrite.rewrite(catalog, target)?;

        if replacement.name != target.def.name {
            return Err(StratumError::RuleConflict {
                rule: self.name.clone(),
                message: format!(
                    "rewrite of '{}' produced an artifact named '{}'",
                    target.def.name, replacement.name
                ),
            });
        }

        self.check_passthrough(&target.def, &replacement)?;
        Ok(replacement)
    }

    /// Every passthrough key of `before` must survive unchanged in `after`
    /// unless it is listed in this rule's overrides. New keys are allowed.
    fn check_passthrough(&self, before: &ArtifactDef, after: &ArtifactDef) -> Result<()> {
        for (key, value) in &before.passthrough {
            if self.overrides.contains(key) {
                continue;
            }
            if after.passthrough.get(key) != Some(value) {
                return Err(StratumError::PassthroughViolation {
                    rule: self.name.clone(),
                    artifact: before.name.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteRule")
            .field("name", &self.name)
            .field("targets", &self.targets)
            .field("overrides", &self.overrides)
            .field("rewrite", &self.rewrite.describe())
            .finish()
    }
}
