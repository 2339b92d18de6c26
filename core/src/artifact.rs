//! Artifact definitions and fingerprints.
//!
//! An [`ArtifactDef`] is what a catalog stores: a name, a version, the build
//! recipe, runtime dependencies (by name), metadata and the passthrough
//! attribute bag. Once a definition is placed in a catalog its dependencies
//! are resolved and it becomes an [`Artifact`] carrying a [`Fingerprint`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content fingerprint of an artifact (hex-encoded SHA-256).
///
/// Covers the artifact's name, version, recipe and the fingerprints of its
/// direct dependencies, which in turn cover their own dependencies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a definition given its resolved dependencies.
    ///
    /// `deps` must be in the definition's declared dependency order.
    pub fn derive(def: &ArtifactDef, deps: &[(&str, &Fingerprint)]) -> Self {
        let canonical = serde_json::json!({
            "name": def.name,
            "version": def.version,
            "recipe": def.recipe,
            "deps": deps
                .iter()
                .map(|(name, fp)| serde_json::json!([name, fp.as_str()]))
                .collect::<Vec<_>>(),
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wrap an existing hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build recipe handed to the external builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    /// Pinned source location (URL plus hash, store path, ...)
    pub source: String,

    /// Builder identifier understood by the build backend
    #[serde(default)]
    pub builder: String,

    /// Builder arguments
    #[serde(default)]
    pub args: BTreeMap<String, String>,

    /// Patches applied on top of the source, in order
    #[serde(default)]
    pub patches: Vec<String>,
}

/// Descriptive metadata. Not part of the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A passthrough attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Opaque text
    Text(String),
    /// Cross-reference to another artifact by name
    Artifact { artifact: String },
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }

    pub fn artifact(name: impl Into<String>) -> Self {
        AttrValue::Artifact {
            artifact: name.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Artifact { .. } => None,
        }
    }
}

/// Stored artifact definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactDef {
    pub name: String,

    pub version: String,

    pub recipe: Recipe,

    /// Declared runtime dependencies, by artifact name
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub meta: Metadata,

    /// Attributes downstream consumers index on
    #[serde(default)]
    pub passthrough: BTreeMap<String, AttrValue>,
}

impl ArtifactDef {
    /// Create a definition with an empty recipe builder and no dependencies.
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            recipe: Recipe {
                source: source.into(),
                ..Recipe::default()
            },
            deps: Vec::new(),
            meta: Metadata::default(),
            passthrough: BTreeMap::new(),
        }
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.passthrough.insert(key.into(), value);
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.meta.license = Some(license.into());
        self
    }
}

/// An artifact resolved inside a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub def: ArtifactDef,
}

impl Artifact {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn version(&self) -> &str {
        &self.def.version
    }

    /// Look up a passthrough attribute.
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.def.passthrough.get(key)
    }

    /// Directory name of this artifact inside an image store: `<fingerprint>-<name>`.
    pub fn store_name(&self) -> String {
        format!("{}-{}", self.fingerprint, self.def.name)
    }

    /// Two artifacts are substitutable when their fingerprints match.
    pub fn substitutable_for(&self, other: &Artifact) -> bool {
        self.fingerprint == other.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def() -> ArtifactDef {
        ArtifactDef::new("openssl", "3.0.13", "https://example.org/openssl-3.0.13.tar.gz")
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Fingerprint::derive(&def(), &[]);
        let b = Fingerprint::derive(&def(), &[]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_recipe() {
        let base = Fingerprint::derive(&def(), &[]);

        let mut patched = def();
        patched.recipe.patches.push("CVE-2024-0001.patch".to_string());
        assert_ne!(base, Fingerprint::derive(&patched, &[]));

        let mut bumped = def();
        bumped.version = "3.0.14".to_string();
        assert_ne!(base, Fingerprint::derive(&bumped, &[]));
    }

    #[test]
    fn test_fingerprint_changes_with_dependency() {
        let zlib_a = Fingerprint::from_hex("aa");
        let zlib_b = Fingerprint::from_hex("bb");
        let d = def().with_deps(["zlib"]);

        let a = Fingerprint::derive(&d, &[("zlib", &zlib_a)]);
        let b = Fingerprint::derive(&d, &[("zlib", &zlib_b)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_metadata_and_passthrough() {
        let plain = Fingerprint::derive(&def(), &[]);
        let annotated = def()
            .with_license("Apache-2.0")
            .with_attr("tier", AttrValue::text("security"));
        assert_eq!(plain, Fingerprint::derive(&annotated, &[]));
    }

    #[test]
    fn test_fingerprint_short() {
        let fp = Fingerprint::from_hex("0123456789abcdef0123");
        assert_eq!(fp.short(), "0123456789ab");
        assert_eq!(Fingerprint::from_hex("abc").short(), "abc");
    }

    #[test]
    fn test_attr_value_yaml_forms() {
        let yaml = "interpreter: { artifact: python3 }\nabi: cp311\n";
        let attrs: BTreeMap<String, AttrValue> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(attrs["interpreter"], AttrValue::artifact("python3"));
        assert_eq!(attrs["abi"], AttrValue::text("cp311"));
        assert_eq!(attrs["abi"].as_text(), Some("cp311"));
        assert_eq!(attrs["interpreter"].as_text(), None);
    }

    #[test]
    fn test_artifact_def_rejects_unknown_fields() {
        let yaml = "name: a\nversion: '1'\nrecipe: { source: s }\nbogus: true\n";
        let result: std::result::Result<ArtifactDef, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_store_name() {
        let d = def();
        let artifact = Artifact {
            fingerprint: Fingerprint::derive(&d, &[]),
            def: d,
        };
        assert!(artifact.store_name().ends_with("-openssl"));
        assert!(artifact.store_name().starts_with(artifact.fingerprint.as_str()));
        assert!(artifact.substitutable_for(&artifact.clone()));
    }
}
