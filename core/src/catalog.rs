//! Immutable artifact catalog.
//!
//! A catalog maps artifact names to resolved [`Artifact`]s for one upstream
//! snapshot. Fingerprints are derived when the catalog is built, in
//! dependency order, so an artifact's fingerprint always reflects the current
//! fingerprints of everything it depends on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactDef, Fingerprint};
use crate::error::{Result, StratumError};

/// Read-only catalog contract consumed by the overlay chain, the package-set
/// registry and the assembler.
pub trait ArtifactCatalog {
    /// Resolve a name to its artifact.
    fn resolve(&self, name: &str) -> Result<Artifact>;

    /// All artifact names, sorted.
    fn all_names(&self) -> BTreeSet<String>;

    /// Identity of the pinned upstream snapshot shared by every artifact.
    fn snapshot(&self) -> &str;
}

/// Concrete catalog. Cloning is cheap; contents are never mutated.
#[derive(Debug, Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

#[derive(Debug)]
struct CatalogInner {
    snapshot: String,
    entries: BTreeMap<String, Artifact>,
}

impl Catalog {
    /// Build a catalog from definitions.
    ///
    /// Fails on duplicate names, unknown dependencies and dependency cycles.
    pub fn new<I>(snapshot: impl Into<String>, defs: I) -> Result<Self>
    where
        I: IntoIterator<Item = ArtifactDef>,
    {
        let mut by_name = BTreeMap::new();
        for def in defs {
            if by_name.contains_key(&def.name) {
                return Err(StratumError::DuplicateArtifact(def.name));
            }
            by_name.insert(def.name.clone(), def);
        }

        let snapshot = snapshot.into();
        let entries = derive_fingerprints(by_name)?;
        tracing::debug!(snapshot = %snapshot, artifacts = entries.len(), "Catalog built");

        Ok(Self {
            inner: Arc::new(CatalogInner { snapshot, entries }),
        })
    }

    /// Produce a new catalog where the given names carry new definitions.
    ///
    /// Every other definition is carried forward unchanged. Fingerprints are
    /// re-derived, so dependents of a replaced artifact pick up the change.
    pub fn with_replacements(&self, replacements: BTreeMap<String, ArtifactDef>) -> Result<Self> {
        let mut defs: BTreeMap<String, ArtifactDef> = self
            .inner
            .entries
            .iter()
            .map(|(name, artifact)| (name.clone(), artifact.def.clone()))
            .collect();

        for (name, def) in replacements {
            if !defs.contains_key(&name) {
                return Err(StratumError::artifact_not_found(name));
            }
            defs.insert(name, def);
        }

        Ok(Self {
            inner: Arc::new(CatalogInner {
                snapshot: self.inner.snapshot.clone(),
                entries: derive_fingerprints(defs)?,
            }),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.inner.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Iterate artifacts in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.inner.entries.values()
    }

    /// Names of every artifact that depends on `name`, directly or transitively.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];

        while let Some(current) = frontier.pop() {
            for artifact in self.inner.entries.values() {
                if artifact.def.deps.iter().any(|d| d == &current)
                    && found.insert(artifact.def.name.clone())
                {
                    frontier.push(artifact.def.name.clone());
                }
            }
        }

        found
    }
}

impl ArtifactCatalog for Catalog {
    fn resolve(&self, name: &str) -> Result<Artifact> {
        self.get(name)
            .cloned()
            .ok_or_else(|| StratumError::artifact_not_found(name))
    }

    fn all_names(&self) -> BTreeSet<String> {
        self.inner.entries.keys().cloned().collect()
    }

    fn snapshot(&self) -> &str {
        &self.inner.snapshot
    }
}

/// Resolve fingerprints for every definition, depth-first over dependencies.
fn derive_fingerprints(defs: BTreeMap<String, ArtifactDef>) -> Result<BTreeMap<String, Artifact>> {
    let mut done: BTreeMap<String, Fingerprint> = BTreeMap::new();
    let mut stack: Vec<String> = Vec::new();

    for name in defs.keys() {
        visit(name, &defs, &mut done, &mut stack)?;
    }

    let mut entries = BTreeMap::new();
    for (name, def) in defs {
        let fingerprint = done
            .remove(&name)
            .ok_or_else(|| StratumError::artifact_not_found(name.clone()))?;
        entries.insert(name, Artifact { fingerprint, def });
    }
    Ok(entries)
}

fn visit(
    name: &str,
    defs: &BTreeMap<String, ArtifactDef>,
    done: &mut BTreeMap<String, Fingerprint>,
    stack: &mut Vec<String>,
) -> Result<Fingerprint> {
    if let Some(fp) = done.get(name) {
        return Ok(fp.clone());
    }

    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut chain = stack[pos..].to_vec();
        chain.push(name.to_string());
        return Err(StratumError::DependencyCycle { chain });
    }

    let def = defs
        .get(name)
        .ok_or_else(|| StratumError::artifact_not_found(name))?;

    stack.push(name.to_string());
    let mut dep_fps = Vec::with_capacity(def.deps.len());
    for dep in &def.deps {
        if !defs.contains_key(dep) {
            return Err(StratumError::NotFound {
                kind: "dependency",
                name: format!("{} (required by {})", dep, name),
            });
        }
        dep_fps.push((dep.as_str(), visit(dep, defs, done, stack)?));
    }
    stack.pop();

    let refs: Vec<(&str, &Fingerprint)> = dep_fps.iter().map(|(n, fp)| (*n, fp)).collect();
    let fingerprint = Fingerprint::derive(def, &refs);
    done.insert(name.to_string(), fingerprint.clone());
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<ArtifactDef> {
        vec![
            ArtifactDef::new("glibc", "2.39", "src:glibc"),
            ArtifactDef::new("zlib", "1.3", "src:zlib").with_deps(["glibc"]),
            ArtifactDef::new("openssl", "3.0.13", "src:openssl").with_deps(["glibc", "zlib"]),
            ArtifactDef::new("curl", "8.6.0", "src:curl").with_deps(["openssl"]),
            ArtifactDef::new("jq", "1.7", "src:jq"),
        ]
    }

    #[test]
    fn test_catalog_resolve() {
        let catalog = Catalog::new("24.05", defs()).unwrap();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.snapshot(), "24.05");

        let curl = catalog.resolve("curl").unwrap();
        assert_eq!(curl.version(), "8.6.0");
        assert_eq!(curl.fingerprint.as_str().len(), 64);
    }

    #[test]
    fn test_catalog_resolve_missing() {
        let catalog = Catalog::new("24.05", defs()).unwrap();
        let err = catalog.resolve("wget").unwrap_err();
        assert!(matches!(err, StratumError::NotFound { kind: "artifact", .. }));
    }

    #[test]
    fn test_catalog_all_names_sorted() {
        let catalog = Catalog::new("24.05", defs()).unwrap();
        let names: Vec<String> = catalog.all_names().into_iter().collect();
        assert_eq!(names, vec!["curl", "glibc", "jq", "openssl", "zlib"]);
    }

    #[test]
    fn test_catalog_duplicate_definition() {
        let mut d = defs();
        d.push(ArtifactDef::new("jq", "1.6", "src:jq-old"));
        let err = Catalog::new("24.05", d).unwrap_err();
        assert!(matches!(err, StratumError::DuplicateArtifact(name) if name == "jq"));
    }

    #[test]
    fn test_catalog_unknown_dependency() {
        let d = vec![ArtifactDef::new("curl", "8.6.0", "src:curl").with_deps(["openssl"])];
        let err = Catalog::new("24.05", d).unwrap_err();
        assert!(err.to_string().contains("openssl (required by curl)"));
    }

    #[test]
    fn test_catalog_dependency_cycle() {
        let d = vec![
            ArtifactDef::new("a", "1", "src:a").with_deps(["b"]),
            ArtifactDef::new("b", "1", "src:b").with_deps(["a"]),
        ];
        match Catalog::new("24.05", d).unwrap_err() {
            StratumError::DependencyCycle { chain } => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fingerprints_identical_across_builds() {
        let a = Catalog::new("24.05", defs()).unwrap();
        let b = Catalog::new("24.05", defs().into_iter().rev()).unwrap();
        for name in a.all_names() {
            assert_eq!(a.get(&name).unwrap(), b.get(&name).unwrap());
        }
    }

    #[test]
    fn test_with_replacements_propagates_to_dependents() {
        let base = Catalog::new("24.05", defs()).unwrap();

        let mut patched = base.get("openssl").unwrap().def.clone();
        patched.recipe.patches.push("fix.patch".to_string());
        let mut replacements = BTreeMap::new();
        replacements.insert("openssl".to_string(), patched);

        let next = base.with_replacements(replacements).unwrap();

        assert_ne!(
            base.get("openssl").unwrap().fingerprint,
            next.get("openssl").unwrap().fingerprint
        );
        // curl's definition is untouched but its fingerprint follows openssl
        assert_eq!(base.get("curl").unwrap().def, next.get("curl").unwrap().def);
        assert_ne!(
            base.get("curl").unwrap().fingerprint,
            next.get("curl").unwrap().fingerprint
        );
        // unrelated artifacts are identical
        assert_eq!(base.get("jq"), next.get("jq"));
        assert_eq!(base.get("zlib"), next.get("zlib"));
    }

    #[test]
    fn test_with_replacements_unknown_name() {
        let base = Catalog::new("24.05", defs()).unwrap();
        let mut replacements = BTreeMap::new();
        replacements.insert("wget".to_string(), ArtifactDef::new("wget", "1", "src:wget"));
        assert!(base.with_replacements(replacements).is_err());
    }

    #[test]
    fn test_dependents_of() {
        let catalog = Catalog::new("24.05", defs()).unwrap();
        let deps: Vec<String> = catalog.dependents_of("zlib").into_iter().collect();
        assert_eq!(deps, vec!["curl", "openssl"]);
        assert!(catalog.dependents_of("jq").is_empty());
    }
}
