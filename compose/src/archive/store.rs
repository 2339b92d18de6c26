//! Build backend seam.
//!
//! Turning a recipe into artifact contents is the job of an external,
//! content-addressed build system. Stratum only needs to know where the
//! realised contents of an artifact live on the host.

use std::path::{Path, PathBuf};

use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, Fingerprint};

/// Realises artifacts on the host filesystem.
pub trait Builder: Send + Sync {
    /// Return the directory holding the realised contents of `artifact`.
    ///
    /// Failures are surfaced to the caller unchanged and never retried.
    fn build(&self, artifact: &Artifact) -> Result<ArtifactPath>;
}

/// Host location of a realised artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    pub artifact: String,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
}

/// A directory of already-built artifacts laid out as
/// `<root>/<fingerprint>-<name>/`.
#[derive(Debug, Clone)]
pub struct PrebuiltStore {
    root: PathBuf,
}

impl PrebuiltStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `artifact` is expected to be realised.
    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        self.root.join(artifact.store_name())
    }

    pub fn contains(&self, artifact: &Artifact) -> bool {
        self.path_for(artifact).is_dir()
    }
}

impl Builder for PrebuiltStore {
    fn build(&self, artifact: &Artifact) -> Result<ArtifactPath> {
        let path = self.path_for(artifact);
        if !path.is_dir() {
            return Err(StratumError::BuildError {
                artifact: artifact.def.name.clone(),
                message: format!("not realised in store: {}", path.display()),
            });
        }

        tracing::debug!(
            artifact = %artifact.name(),
            path = %path.display(),
            "Using prebuilt artifact"
        );
        Ok(ArtifactPath {
            artifact: artifact.def.name.clone(),
            fingerprint: artifact.fingerprint.clone(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{ArtifactCatalog, ArtifactDef, Catalog};
    use tempfile::TempDir;

    fn jq() -> Artifact {
        Catalog::new("24.05", vec![ArtifactDef::new("jq", "1.7", "src:jq")])
            .unwrap()
            .resolve("jq")
            .unwrap()
    }

    #[test]
    fn test_prebuilt_store_hit() {
        let tmp = TempDir::new().unwrap();
        let artifact = jq();
        std::fs::create_dir_all(tmp.path().join(artifact.store_name())).unwrap();

        let store = PrebuiltStore::new(tmp.path());
        assert!(store.contains(&artifact));
        let built = store.build(&artifact).unwrap();
        assert_eq!(built.artifact, "jq");
        assert_eq!(built.fingerprint, artifact.fingerprint);
        assert!(built.path.ends_with(artifact.store_name()));
    }

    #[test]
    fn test_prebuilt_store_miss() {
        let tmp = TempDir::new().unwrap();
        let store = PrebuiltStore::new(tmp.path());
        match store.build(&jq()).unwrap_err() {
            StratumError::BuildError { artifact, message } => {
                assert_eq!(artifact, "jq");
                assert!(message.contains("not realised"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
