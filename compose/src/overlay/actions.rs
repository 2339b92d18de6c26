//! Declarative rewrites usable from a project file.
//!
//! Each action is a pure function of the catalog-so-far and the target:
//!
//! - `patch` appends patches to the recipe (security fixes)
//! - `substitute` swaps the recipe source, e.g. a differently licensed fork
//! - `rebuild` pins dependency fingerprints into the recipe so the target is
//!   rebuilt against whatever those dependencies currently are
//! - `rewire` replaces one dependency edge with another artifact
//! - `set-attrs` overrides passthrough attributes (the rule must list them
//!   in its `overrides`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, ArtifactDef, AttrValue, Catalog};

use super::rule::Rewrite;

/// Prefix of recipe arguments written by `rebuild`.
pub const BUILT_AGAINST_PREFIX: &str = "built-against.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RewriteAction {
    Patch {
        patches: Vec<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Substitute {
        source: String,
        #[serde(default)]
        builder: Option<String>,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        license: Option<String>,
    },
    Rebuild {
        against: Vec<String>,
    },
    Rewire {
        from: String,
        to: String,
    },
    SetAttrs {
        attrs: BTreeMap<String, AttrValue>,
    },
}

impl Rewrite for RewriteAction {
    fn rewrite(&self, catalog: &Catalog, target: &Artifact) -> Result<ArtifactDef> {
        let mut def = target.def.clone();

        match self {
            RewriteAction::Patch { patches, version } => {
                def.recipe.patches.extend(patches.iter().cloned());
                if let Some(version) = version {
                    def.version = version.clone();
                }
            }

            RewriteAction::Substitute {
                source,
                builder,
                version,
                license,
            } => {
                def.recipe.source = source.clone();
                // Patches were written against the old source
                def.recipe.patches.clear();
                if let Some(builder) = builder {
                    def.recipe.builder = builder.clone();
                }
                if let Some(version) = version {
                    def.version = version.clone();
                }
                if let Some(license) = license {
                    def.meta.license = Some(license.clone());
                }
            }

            RewriteAction::Rebuild { against } => {
                for dep in against {
                    if !def.deps.iter().any(|d| d == dep) {
                        return Err(StratumError::ConfigError(format!(
                            "cannot rebuild '{}' against '{}': not a dependency",
                            def.name, dep
                        )));
                    }
                    let current = catalog
                        .get(dep)
                        .ok_or_else(|| StratumError::artifact_not_found(dep.clone()))?;
                    def.recipe.args.insert(
                        format!("{}{}", BUILT_AGAINST_PREFIX, dep),
                        current.fingerprint.to_string(),
                    );
                }
            }

            RewriteAction::Rewire { from, to } => {
                if !catalog.contains(to) {
                    return Err(StratumError::artifact_not_found(to.clone()));
                }
                let position = def
                    .deps
                    .iter()
                    .position(|d| d == from)
                    .ok_or_else(|| {
                        StratumError::ConfigError(format!(
                            "cannot rewire '{}': '{}' is not a dependency",
                            def.name, from
                        ))
                    })?;
                def.deps[position] = to.clone();
            }

            RewriteAction::SetAttrs { attrs } => {
                for (key, value) in attrs {
                    def.passthrough.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(def)
    }

    fn describe(&self) -> String {
        match self {
            RewriteAction::Patch { patches, .. } => format!("patch({})", patches.len()),
            RewriteAction::Substitute { source, .. } => format!("substitute({})", source),
            RewriteAction::Rebuild { against } => format!("rebuild(against {})", against.join(",")),
            RewriteAction::Rewire { from, to } => format!("rewire({} -> {})", from, to),
            RewriteAction::SetAttrs { attrs } => {
                let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
                format!("set-attrs({})", keys.join(","))
            }
        }
    }
}
