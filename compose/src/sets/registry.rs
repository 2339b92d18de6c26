use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, ArtifactCatalog, Catalog, Fingerprint};

/// One reference inside a package set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SetEntry {
    /// An artifact, from the named source catalog or the primary one
    Artifact { source: Option<String>, name: String },
    /// Every artifact of another set
    Set(String),
}

impl SetEntry {
    pub fn artifact(name: impl Into<String>) -> Self {
        SetEntry::Artifact {
            source: None,
            name: name.into(),
        }
    }

    pub fn qualified(source: impl Into<String>, name: impl Into<String>) -> Self {
        SetEntry::Artifact {
            source: Some(source.into()),
            name: name.into(),
        }
    }

    pub fn set(name: impl Into<String>) -> Self {
        SetEntry::Set(name.into())
    }

    /// Parse `name`, `source:name` or `@set`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |why: &str| StratumError::ConfigError(format!("invalid set entry '{}': {}", s, why));

        if let Some(set) = s.strip_prefix('@') {
            if set.is_empty() || set.contains(':') {
                return Err(invalid("expected '@<set>'"));
            }
            return Ok(SetEntry::set(set));
        }

        match s.split_once(':') {
            Some((source, name)) => {
                if source.is_empty() || name.is_empty() || name.contains(':') {
                    return Err(invalid("expected '<source>:<artifact>'"));
                }
                Ok(SetEntry::qualified(source, name))
            }
            None if s.is_empty() => Err(invalid("empty reference")),
            None => Ok(SetEntry::artifact(s)),
        }
    }
}

impl fmt::Display for SetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetEntry::Artifact { source: Some(source), name } => write!(f, "{}:{}", source, name),
            SetEntry::Artifact { source: None, name } => f.write_str(name),
            SetEntry::Set(name) => write!(f, "@{}", name),
        }
    }
}

impl FromStr for SetEntry {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self> {
        SetEntry::parse(s)
    }
}

impl TryFrom<String> for SetEntry {
    type Error = StratumError;

    fn try_from(s: String) -> Result<Self> {
        SetEntry::parse(&s)
    }
}

impl From<SetEntry> for String {
    fn from(entry: SetEntry) -> Self {
        entry.to_string()
    }
}

/// A named, ordered list of references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    pub name: String,
    pub entries: Vec<SetEntry>,
}

impl PackageSet {
    pub fn new<I>(name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = SetEntry>,
    {
        Self {
            name: name.into(),
            entries: entries.into_iter().collect(),
        }
    }

    /// Build a set from textual entries.
    pub fn parse<I, S>(name: impl Into<String>, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|e| SetEntry::parse(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, entries))
    }
}

/// Catalogs a set may draw artifacts from.
#[derive(Debug, Clone)]
pub struct Sources {
    primary: Catalog,
    named: BTreeMap<String, Catalog>,
}

impl Sources {
    pub fn new(primary: Catalog) -> Self {
        Self {
            primary,
            named: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, catalog: Catalog) -> Self {
        self.named.insert(name.into(), catalog);
        self
    }

    pub fn primary(&self) -> &Catalog {
        &self.primary
    }

    pub fn source(&self, name: &str) -> Option<&Catalog> {
        self.named.get(name)
    }

    /// Resolve an artifact from the named source, or the primary catalog.
    pub fn lookup(&self, source: Option<&str>, name: &str) -> Result<Artifact> {
        match source {
            None => self.primary.resolve(name),
            Some(source) => self
                .named
                .get(source)
                .ok_or_else(|| StratumError::NotFound {
                    kind: "source",
                    name: source.to_string(),
                })?
                .resolve(name),
        }
    }
}

impl Sources {
    /// Snapshot label for `artifacts`: the primary snapshot, then
    /// `+<snapshot>` for each named source that supplied an artifact the
    /// primary catalog does not hold.
    pub fn snapshot_for(&self, artifacts: &[Artifact]) -> String {
        let mut extra = BTreeSet::new();
        for artifact in artifacts {
            if holds(&self.primary, artifact) {
                continue;
            }
            for (name, catalog) in &self.named {
                if holds(catalog, artifact) {
                    tracing::debug!(
                        artifact = %artifact.name(),
                        source = %name,
                        "Artifact drawn from a named source"
                    );
                    extra.insert(catalog.snapshot().to_string());
                    break;
                }
            }
        }

        let mut label = self.primary.snapshot().to_string();
        for snapshot in extra {
            label.push('+');
            label.push_str(&snapshot);
        }
        label
    }
}

fn holds(catalog: &Catalog, artifact: &Artifact) -> bool {
    catalog
        .get(artifact.name())
        .map_or(false, |a| a.fingerprint == artifact.fingerprint)
}

impl From<Catalog> for Sources {
    fn from(primary: Catalog) -> Self {
        Sources::new(primary)
    }
}

/// Registry of named package sets.
#[derive(Debug, Clone, Default)]
pub struct PackageSetRegistry {
    sets: BTreeMap<String, PackageSet>,
}

impl PackageSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a set. Set names are unique.
    pub fn define(&mut self, set: PackageSet) -> Result<()> {
        if set.name.is_empty() || set.name.contains(':') || set.name.starts_with('@') {
            return Err(StratumError::ConfigError(format!(
                "invalid package set name '{}'",
                set.name
            )));
        }
        if self.sets.contains_key(&set.name) {
            return Err(StratumError::ConfigError(format!(
                "package set '{}' is defined more than once",
                set.name
            )));
        }
        self.sets.insert(set.name.clone(), set);
        Ok(())
    }

    pub fn with_set(mut self, set: PackageSet) -> Result<Self> {
        self.define(set)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&PackageSet> {
        self.sets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Flatten a set into an ordered, duplicate-free artifact list.
    pub fn resolve_set(&self, name: &str, sources: &Sources) -> Result<Vec<Artifact>> {
        let mut flat = Vec::new();
        self.expand(name, sources, &mut Vec::new(), &mut flat)?;
        let resolved = dedupe_first_occurrence(name, flat)?;

        tracing::debug!(set = %name, artifacts = resolved.len(), "Resolved package set");
        Ok(resolved)
    }

    /// Resolve the concatenation of several sets, in order.
    pub fn resolve_sets<S: AsRef<str>>(&self, names: &[S], sources: &Sources) -> Result<Vec<Artifact>> {
        let names: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();

        let mut flat = Vec::new();
        for name in &names {
            self.expand(name, sources, &mut Vec::new(), &mut flat)?;
        }

        let label = names.join(" ++ ");
        let resolved = dedupe_first_occurrence(&label, flat)?;

        tracing::debug!(sets = %label, artifacts = resolved.len(), "Resolved package sets");
        Ok(resolved)
    }

    fn expand(
        &self,
        name: &str,
        sources: &Sources,
        stack: &mut Vec<String>,
        out: &mut Vec<Artifact>,
    ) -> Result<()> {
        if let Some(pos) = stack.iter().position(|s| s == name) {
            let mut chain = stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(StratumError::CyclicSet { chain });
        }

        let set = self
            .sets
            .get(name)
            .ok_or_else(|| StratumError::set_not_found(name))?;

        stack.push(name.to_string());
        for entry in &set.entries {
            match entry {
                SetEntry::Artifact { source, name } => {
                    out.push(sources.lookup(source.as_deref(), name)?);
                }
                SetEntry::Set(nested) => self.expand(nested, sources, stack, out)?,
            }
        }
        stack.pop();
        Ok(())
    }
}

/// Keep the first occurrence of every name; a repeat with another
/// fingerprint is a conflict.
fn dedupe_first_occurrence(set: &str, artifacts: Vec<Artifact>) -> Result<Vec<Artifact>> {
    let mut seen: BTreeMap<String, Fingerprint> = BTreeMap::new();
    let mut result = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        match seen.get(artifact.name()) {
            Some(first) if *first == artifact.fingerprint => continue,
            Some(first) => {
                return Err(StratumError::SetConflict {
                    set: set.to_string(),
                    name: artifact.def.name.clone(),
                    first: first.to_string(),
                    second: artifact.fingerprint.to_string(),
                });
            }
            None => {
                seen.insert(artifact.def.name.clone(), artifact.fingerprint.clone());
                result.push(artifact);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::ArtifactDef;

    fn catalog() -> Catalog {
        Catalog::new(
            "24.05",
            ["p", "q", "r", "s"]
                .into_iter()
                .map(|n| ArtifactDef::new(n, "1.0", format!("src:{}", n))),
        )
        .unwrap()
    }

    fn names(artifacts: &[Artifact]) -> Vec<&str> {
        artifacts.iter().map(|a| a.name()).collect()
    }

    fn registry_of(sets: &[(&str, &[&str])]) -> PackageSetRegistry {
        let mut registry = PackageSetRegistry::new();
        for (name, entries) in sets {
            registry
                .define(PackageSet::parse(*name, entries.iter()).unwrap())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_parse_entries() {
        assert_eq!(SetEntry::parse("python3").unwrap(), SetEntry::artifact("python3"));
        assert_eq!(
            SetEntry::parse("unstable:python3").unwrap(),
            SetEntry::qualified("unstable", "python3")
        );
        assert_eq!(SetEntry::parse("@core").unwrap(), SetEntry::set("core"));

        for bad in ["", "@", ":x", "x:", "a:b:c", "@a:b"] {
            assert!(SetEntry::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_entry_display() {
        for text in ["python3", "unstable:python3", "@core"] {
            assert_eq!(SetEntry::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_set_from_yaml() {
        let yaml = "name: full\nentries: ['@core', net, 'unstable:curl']\n";
        let set: PackageSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            set.entries,
            vec![
                SetEntry::set("core"),
                SetEntry::artifact("net"),
                SetEntry::qualified("unstable", "curl"),
            ]
        );

        let bad = "name: full\nentries: ['@']\n";
        assert!(serde_yaml::from_str::<PackageSet>(bad).is_err());
    }

    #[test]
    fn test_concatenation_dedupes_first_occurrence() {
        let registry = registry_of(&[("a", &["p", "q"]), ("b", &["q", "r"]), ("ab", &["@a", "@b"])]);
        let sources = Sources::from(catalog());

        let resolved = registry.resolve_set("ab", &sources).unwrap();
        assert_eq!(names(&resolved), vec!["p", "q", "r"]);

        let resolved = registry.resolve_sets(&["b", "a"], &sources).unwrap();
        assert_eq!(names(&resolved), vec!["q", "r", "p"]);
    }

    #[test]
    fn test_nested_set_referenced_twice() {
        let registry = registry_of(&[("core", &["p"]), ("x", &["@core", "q"]), ("y", &["@x", "@core", "r"])]);
        let resolved = registry.resolve_set("y", &Sources::from(catalog())).unwrap();
        assert_eq!(names(&resolved), vec!["p", "q", "r"]);
    }

    #[test]
    fn test_conflicting_fingerprints() {
        let unstable = Catalog::new("unstable", vec![ArtifactDef::new("q", "2.0", "src:q2")]).unwrap();
        let sources = Sources::from(catalog()).with_source("unstable", unstable);
        let registry = registry_of(&[("a", &["p", "q"]), ("b", &["unstable:q", "r"])]);

        match registry.resolve_sets(&["a", "b"], &sources).unwrap_err() {
            StratumError::SetConflict { set, name, .. } => {
                assert_eq!(set, "a ++ b");
                assert_eq!(name, "q");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_artifact_from_two_sources_is_not_a_conflict() {
        let catalog = catalog();
        let sources = Sources::from(catalog.clone()).with_source("mirror", catalog);
        let registry = registry_of(&[("a", &["p", "mirror:p", "q"])]);
        let resolved = registry.resolve_set("a", &sources).unwrap();
        assert_eq!(names(&resolved), vec!["p", "q"]);
    }

    #[test]
    fn test_snapshot_label_names_contributing_sources() {
        let unstable = Catalog::new("unstable", vec![ArtifactDef::new("jq", "1.8", "src:jq")]).unwrap();
        let mirror = catalog();
        let sources = Sources::from(catalog())
            .with_source("unstable", unstable)
            .with_source("mirror", mirror);

        let registry = registry_of(&[("a", &["p", "mirror:q"]), ("b", &["p", "unstable:jq"])]);
        let primary_only = registry.resolve_set("a", &sources).unwrap();
        assert_eq!(sources.snapshot_for(&primary_only), "24.05");

        let mixed = registry.resolve_set("b", &sources).unwrap();
        assert_eq!(sources.snapshot_for(&mixed), "24.05+unstable");
    }

    #[test]
    fn test_cycle_reports_path() {
        let registry = registry_of(&[("a", &["p", "@b"]), ("b", &["@c"]), ("c", &["@a"])]);
        match registry.resolve_set("a", &Sources::from(catalog())).unwrap_err() {
            StratumError::CyclicSet { chain } => assert_eq!(chain, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }

        let registry = registry_of(&[("self", &["@self"])]);
        assert!(matches!(
            registry.resolve_set("self", &Sources::from(catalog())),
            Err(StratumError::CyclicSet { .. })
        ));
    }

    #[test]
    fn test_unknown_names() {
        let sources = Sources::from(catalog());
        let registry = registry_of(&[("a", &["p", "@missing"]), ("b", &["zz"]), ("c", &["nope:p"])]);

        assert!(matches!(
            registry.resolve_set("a", &sources),
            Err(StratumError::NotFound { kind: "set", .. })
        ));
        assert!(matches!(
            registry.resolve_set("b", &sources),
            Err(StratumError::NotFound { kind: "artifact", .. })
        ));
        assert!(matches!(
            registry.resolve_set("c", &sources),
            Err(StratumError::NotFound { kind: "source", .. })
        ));
        assert!(matches!(
            registry.resolve_set("nope", &sources),
            Err(StratumError::NotFound { kind: "set", .. })
        ));
    }

    #[test]
    fn test_duplicate_set_definition() {
        let mut registry = registry_of(&[("a", &["p"])]);
        let err = registry.define(PackageSet::new("a", vec![])).unwrap_err();
        assert!(matches!(err, StratumError::ConfigError(_)));
        assert!(registry.define(PackageSet::new("@x", vec![])).is_err());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a"]);
    }
}
