//! Ordered application of rewrite rules over a base catalog.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use stratum_core::{Catalog, Fingerprint};

use super::rule::RewriteRule;

/// Chain behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainOptions {
    /// Treat a name replaced by two different rules as a conflict
    /// instead of a warning.
    #[serde(default)]
    pub deny_double_override: bool,
}

/// One replaced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub name: String,
    pub before: Fingerprint,
    pub after: Fingerprint,
}

/// What a single rule did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStep {
    pub rule: String,
    pub action: String,
    pub replaced: Vec<Replacement>,
    /// Artifacts whose fingerprint changed because a dependency was replaced
    pub invalidated: Vec<String>,
}

/// A name replaced by more than one rule in the same chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoubleOverride {
    pub name: String,
    pub first_rule: String,
    pub second_rule: String,
}

/// Audit trail of an overlay chain application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub steps: Vec<RuleStep>,
    pub double_overrides: Vec<DoubleOverride>,
}

impl ChainReport {
    /// Every name replaced by at least one rule.
    pub fn replaced_names(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|s| s.replaced.iter().map(|r| r.name.clone()))
            .collect()
    }
}

/// Result of applying a chain.
#[derive(Debug, Clone)]
pub struct Overlaid {
    pub catalog: Catalog,
    pub report: ChainReport,
}

/// An ordered list of rewrite rules. Earlier rules run first; later rules
/// observe their output.
#[derive(Debug, Clone, Default)]
pub struct OverlayChain {
    rules: Vec<RewriteRule>,
    options: ChainOptions,
}

impl OverlayChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ChainOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a rule at the end of the chain.
    pub fn then(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: RewriteRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order and return the effective catalog.
    pub fn apply(&self, base: &Catalog) -> Result<Overlaid> {
        self.check_rule_names()?;

        let mut current = base.clone();
        let mut report = ChainReport::default();
        let mut claimed: BTreeMap<String, String> = BTreeMap::new();

        for rule in &self.rules {
            let span = tracing::debug_span!("overlay_rule", rule = %rule.name());
            let _enter = span.enter();

            let mut seen_targets = BTreeSet::new();
            let mut replacements = BTreeMap::new();

            for target in rule.targets() {
                if !seen_targets.insert(target.as_str()) {
                    return Err(StratumError::RuleConflict {
                        rule: rule.name().to_string(),
                        message: format!("target '{}' listed twice", target),
                    });
                }

                let artifact = current.get(target).ok_or_else(|| StratumError::MissingTarget {
                    rule: rule.name().to_string(),
                    target: target.clone(),
                })?;

                let replacement = rule.rewrite_target(&current, artifact)?;
                if replacement == artifact.def {
                    tracing::debug!(target = %target, "Rewrite left artifact unchanged");
                    continue;
                }
                replacements.insert(target.clone(), replacement);
            }

            for name in replacements.keys() {
                if let Some(first) = claimed.get(name) {
                    if self.options.deny_double_override {
                        return Err(StratumError::RuleConflict {
                            rule: rule.name().to_string(),
                            message: format!(
                                "'{}' was already replaced by rule '{}'",
                                name, first
                            ),
                        });
                    }
                    tracing::warn!(
                        artifact = %name,
                        first_rule = %first,
                        second_rule = %rule.name(),
                        "Artifact replaced by more than one rule; later rule wins"
                    );
                    report.double_overrides.push(DoubleOverride {
                        name: name.clone(),
                        first_rule: first.clone(),
                        second_rule: rule.name().to_string(),
                    });
                }
            }

            let replaced_names: Vec<String> = replacements.keys().cloned().collect();
            let next = current.with_replacements(replacements)?;

            let mut replaced = Vec::with_capacity(replaced_names.len());
            for name in &replaced_names {
                replaced.push(Replacement {
                    name: name.clone(),
                    before: fingerprint_of(&current, name)?,
                    after: fingerprint_of(&next, name)?,
                });
                claimed.insert(name.clone(), rule.name().to_string());
            }

            let invalidated: Vec<String> = next
                .iter()
                .filter(|a| !replaced_names.contains(&a.def.name))
                .filter(|a| {
                    current
                        .get(a.name())
                        .map(|prev| prev.fingerprint != a.fingerprint)
                        .unwrap_or(false)
                })
                .map(|a| a.def.name.clone())
                .collect();

            tracing::info!(
                rule = %rule.name(),
                action = %rule.describe(),
                replaced = replaced.len(),
                invalidated = invalidated.len(),
                "Applied overlay rule"
            );

            report.steps.push(RuleStep {
                rule: rule.name().to_string(),
                action: rule.describe(),
                replaced,
                invalidated,
            });
            current = next;
        }

        Ok(Overlaid {
            catalog: current,
            report,
        })
    }

    fn check_rule_names(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for rule in &self.rules {
            if !names.insert(rule.name()) {
                return Err(StratumError::RuleConflict {
                    rule: rule.name().to_string(),
                    message: "rule name appears more than once in the chain".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Apply `rules` in order over `base`.
pub fn apply(base: &Catalog, rules: &[RewriteRule]) -> Result<Catalog> {
    let chain = OverlayChain {
        rules: rules.to_vec(),
        options: ChainOptions::default(),
    };
    Ok(chain.apply(base)?.catalog)
}

fn fingerprint_of(catalog: &Catalog, name: &str) -> Result<Fingerprint> {
    catalog
        .get(name)
        .map(|a| a.fingerprint.clone())
        .ok_or_else(|| StratumError::artifact_not_found(name))
}
