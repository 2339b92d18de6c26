//! OCI image layout writer.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use serde_json::json;
use stratum_core::error::{Result, StratumError};

use super::layer::{append_tree, sha256_bytes, write_artifact_layer, write_scaffold_layer, LayerBlob};
use super::store::Builder;
use crate::image::ImageSpec;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Result of writing one image.
#[derive(Debug, Clone)]
pub struct WrittenImage {
    pub reference: String,
    /// Layout directory or archive file
    pub path: PathBuf,
    /// `sha256:<hex>` of the manifest
    pub manifest_digest: String,
    pub config_digest: String,
    /// Artifact layers followed by the scaffold layer
    pub layers: Vec<LayerBlob>,
}

impl WrittenImage {
    /// Total compressed size of all layers.
    pub fn layers_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}

/// Writes [`ImageSpec`]s as OCI image layouts.
pub struct ImageWriter<'a> {
    builder: &'a dyn Builder,
}

impl<'a> ImageWriter<'a> {
    pub fn new(builder: &'a dyn Builder) -> Self {
        Self { builder }
    }

    /// Write an OCI image layout directory at `out_dir`.
    pub fn write_layout(&self, spec: &ImageSpec, out_dir: &Path) -> Result<WrittenImage> {
        tracing::info!(
            image = %spec.reference(),
            out = %out_dir.display(),
            "Writing image layout"
        );

        let blobs_dir = out_dir.join("blobs").join("sha256");
        fs::create_dir_all(&blobs_dir)?;

        let mut layers = Vec::with_capacity(spec.total_layers());
        for layer in &spec.layers {
            layers.push(write_artifact_layer(layer, self.builder, &blobs_dir)?);
        }
        layers.push(write_scaffold_layer(spec, self.builder, &blobs_dir)?);

        let created = Utc
            .timestamp_opt(spec.created, 0)
            .single()
            .ok_or_else(|| StratumError::ConfigError(format!("invalid creation time: {}", spec.created)))?
            .to_rfc3339();
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };

        let mut history: Vec<serde_json::Value> = spec
            .layers
            .iter()
            .map(|l| {
                json!({
                    "created": created,
                    "created_by": format!("stratum: {}", l.names().join(" ")),
                })
            })
            .collect();
        history.push(json!({
            "created": created,
            "created_by": format!("stratum: {} scaffold", spec.role),
        }));

        let config = json!({
            "architecture": arch,
            "os": "linux",
            "created": created,
            "config": spec.runtime.to_oci(),
            "rootfs": {
                "type": "layers",
                "diff_ids": layers.iter().map(|l| l.prefixed_diff_id()).collect::<Vec<_>>(),
            },
            "history": history,
        });
        let config_bytes = serde_json::to_vec_pretty(&config)?;
        let config_digest = sha256_bytes(&config_bytes);
        fs::write(blobs_dir.join(&config_digest), &config_bytes)?;

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": CONFIG_MEDIA_TYPE,
                "digest": format!("sha256:{}", config_digest),
                "size": config_bytes.len(),
            },
            "layers": layers.iter().map(|l| json!({
                "mediaType": LAYER_MEDIA_TYPE,
                "digest": l.prefixed_digest(),
                "size": l.size,
            })).collect::<Vec<_>>(),
        });
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        let manifest_digest = sha256_bytes(&manifest_bytes);
        fs::write(blobs_dir.join(&manifest_digest), &manifest_bytes)?;

        let index = json!({
            "schemaVersion": 2,
            "mediaType": INDEX_MEDIA_TYPE,
            "manifests": [{
                "mediaType": MANIFEST_MEDIA_TYPE,
                "digest": format!("sha256:{}", manifest_digest),
                "size": manifest_bytes.len(),
                "annotations": { REF_NAME_ANNOTATION: spec.reference() },
            }],
        });
        fs::write(out_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
        fs::write(out_dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#)?;

        Ok(WrittenImage {
            reference: spec.reference(),
            path: out_dir.to_path_buf(),
            manifest_digest: format!("sha256:{}", manifest_digest),
            config_digest: format!("sha256:{}", config_digest),
            layers,
        })
    }

    /// Write the image layout packed into a single tar file at `out_path`.
    pub fn write_archive(&self, spec: &ImageSpec, out_path: &Path) -> Result<WrittenImage> {
        let parent = out_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let staging = tempfile::tempdir_in(parent)?;
        let mut written = self.write_layout(spec, staging.path())?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        let mut archive = tar::Builder::new(tmp);
        archive.mode(tar::HeaderMode::Deterministic);
        append_tree(&mut archive, staging.path(), "")?;
        let tmp = archive.into_inner()?;
        tmp.persist(out_path).map_err(|e| e.error)?;

        tracing::info!(
            image = %spec.reference(),
            archive = %out_path.display(),
            manifest = %written.manifest_digest,
            "Wrote image archive"
        );

        written.path = out_path.to_path_buf();
        for layer in &mut written.layers {
            layer.path = PathBuf::from("blobs/sha256").join(&layer.digest);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::PrebuiltStore;
    use crate::image::assemble;
    use stratum_core::{Artifact, ArtifactCatalog, ArtifactDef, Catalog, ImageOptions, Role};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PrebuiltStore, Vec<Artifact>) {
        let catalog = Catalog::new(
            "24.05",
            vec![
                ArtifactDef::new("base", "1", "src:base"),
                ArtifactDef::new("shell", "5.2", "src:bash").with_deps(["base"]),
            ],
        )
        .unwrap();
        let artifacts: Vec<Artifact> = ["base", "shell"]
            .iter()
            .map(|n| catalog.resolve(n).unwrap())
            .collect();

        let tmp = TempDir::new().unwrap();
        for artifact in &artifacts {
            let dir = tmp.path().join(artifact.store_name()).join("bin");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(artifact.name()), artifact.version()).unwrap();
        }
        let store = PrebuiltStore::new(tmp.path());
        (tmp, store, artifacts)
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_write_layout() {
        let (_tmp, store, artifacts) = fixture();
        let spec = assemble(&artifacts, Role::Runtime, &ImageOptions::new("x")).unwrap();
        let out = TempDir::new().unwrap();

        let written = ImageWriter::new(&store).write_layout(&spec, out.path()).unwrap();
        assert_eq!(written.layers.len(), 3);
        assert!(written.layers_size() > 0);

        let index = read_json(&out.path().join("index.json"));
        assert_eq!(index["manifests"][0]["digest"], written.manifest_digest.as_str());
        assert_eq!(
            index["manifests"][0]["annotations"][REF_NAME_ANNOTATION],
            "x:latest"
        );
        assert!(out.path().join("oci-layout").exists());

        let manifest_hex = written.manifest_digest.trim_start_matches("sha256:");
        let manifest = read_json(&out.path().join("blobs/sha256").join(manifest_hex));
        assert_eq!(manifest["layers"].as_array().unwrap().len(), 3);

        let config_hex = written.config_digest.trim_start_matches("sha256:");
        let config = read_json(&out.path().join("blobs/sha256").join(config_hex));
        assert_eq!(config["created"], "1970-01-01T00:00:00+00:00");
        assert_eq!(config["config"]["User"], "app");
        assert_eq!(config["rootfs"]["diff_ids"].as_array().unwrap().len(), 3);
        assert_eq!(config["history"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_layouts_are_byte_identical() {
        let (_tmp, store, artifacts) = fixture();
        let spec = assemble(&artifacts, Role::Runtime, &ImageOptions::new("x")).unwrap();

        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let writer = ImageWriter::new(&store);
        let first = writer.write_layout(&spec, a.path()).unwrap();
        let second = writer.write_layout(&spec, b.path()).unwrap();
        assert_eq!(first.manifest_digest, second.manifest_digest);
    }

    #[test]
    fn test_shared_prefix_shares_blobs() {
        let (_tmp, store, artifacts) = fixture();
        let small = assemble(&artifacts[..1], Role::Runtime, &ImageOptions::new("small")).unwrap();
        let large = assemble(&artifacts, Role::Development, &ImageOptions::new("large")).unwrap();

        let out = TempDir::new().unwrap();
        let writer = ImageWriter::new(&store);
        let a = writer.write_layout(&small, &out.path().join("small")).unwrap();
        let b = writer.write_layout(&large, &out.path().join("large")).unwrap();
        assert_eq!(a.layers[0].digest, b.layers[0].digest);
        assert_ne!(a.layers.last().unwrap().digest, b.layers.last().unwrap().digest);
    }

    #[test]
    fn test_write_archive() {
        let (_tmp, store, artifacts) = fixture();
        let spec = assemble(&artifacts, Role::Runtime, &ImageOptions::new("x")).unwrap();
        let out = TempDir::new().unwrap();
        let path = out.path().join("x.tar");

        let written = ImageWriter::new(&store).write_archive(&spec, &path).unwrap();
        assert_eq!(written.path, path);

        let mut archive = tar::Archive::new(fs::File::open(&path).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"index.json".to_string()));
        assert!(names.contains(&"oci-layout".to_string()));
        let manifest_hex = written.manifest_digest.trim_start_matches("sha256:");
        assert!(names.contains(&format!("blobs/sha256/{}", manifest_hex)));

        // Only the archive remains next to it
        let leftovers: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_missing_artifact_fails_whole_image() {
        let (_tmp, _store, artifacts) = fixture();
        let empty = TempDir::new().unwrap();
        let store = PrebuiltStore::new(empty.path());
        let spec = assemble(&artifacts, Role::Runtime, &ImageOptions::new("x")).unwrap();

        let out = TempDir::new().unwrap();
        let err = ImageWriter::new(&store).write_archive(&spec, &out.path().join("x.tar")).unwrap_err();
        assert!(matches!(err, StratumError::BuildError { .. }));
        assert!(!out.path().join("x.tar").exists());
    }
}
