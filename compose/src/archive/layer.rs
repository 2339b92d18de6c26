//! Deterministic layer tarballs.
//!
//! Entries are written in sorted path order with zeroed timestamps and
//! fixed ownership, and gzip headers carry no name or time, so a layer's
//! bytes depend only on the contents it packs.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use stratum_core::error::{Result, StratumError};
use tempfile::NamedTempFile;

use super::store::Builder;
use crate::image::layout::ScaffoldLayout;
use crate::image::{EntryKind, FileContent, ImageSpec, Layer};

/// Hashes everything written through it.
struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A layer blob written to an OCI blob directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBlob {
    /// Path to the tar.gz blob
    pub path: PathBuf,
    /// SHA256 of the compressed blob (hex, without "sha256:" prefix)
    pub digest: String,
    /// SHA256 of the uncompressed tar (hex, without "sha256:" prefix)
    pub diff_id: String,
    /// Compressed size in bytes
    pub size: u64,
}

impl LayerBlob {
    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }

    pub fn prefixed_diff_id(&self) -> String {
        format!("sha256:{}", self.diff_id)
    }
}

type LayerTar = tar::Builder<DigestWriter<GzEncoder<DigestWriter<NamedTempFile>>>>;

fn start_layer(blobs_dir: &Path) -> Result<LayerTar> {
    let file = NamedTempFile::new_in(blobs_dir)?;
    let compressed = DigestWriter::new(file);
    let encoder = GzEncoder::new(compressed, Compression::default());
    let mut builder = tar::Builder::new(DigestWriter::new(encoder));
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    Ok(builder)
}

fn finish_layer(builder: LayerTar, blobs_dir: &Path) -> Result<LayerBlob> {
    let uncompressed = builder.into_inner()?;
    let (encoder, diff_id, _) = uncompressed.finish();
    let compressed = encoder.finish()?;
    let (file, digest, size) = compressed.finish();

    let path = blobs_dir.join(&digest);
    file.persist(&path).map_err(|e| e.error)?;

    Ok(LayerBlob {
        path,
        digest,
        diff_id,
        size,
    })
}

fn header(entry_type: tar::EntryType, mode: u32, uid: u32, gid: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(uid as u64);
    header.set_gid(gid as u64);
    header.set_mtime(0);
    header.set_size(size);
    header
}

fn append_dir_entry<W: Write>(builder: &mut tar::Builder<W>, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let mut h = header(tar::EntryType::Directory, mode, uid, gid, 0);
    builder.append_data(&mut h, format!("{}/", path), io::empty())?;
    Ok(())
}

fn append_file_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let mut h = header(tar::EntryType::Regular, mode, uid, gid, data.len() as u64);
    builder.append_data(&mut h, path, data)?;
    Ok(())
}

/// Append the tree under `src` at `prefix`, in sorted order, owned by root.
/// Symlinks are stored as links.
pub(crate) fn append_tree<W: Write>(builder: &mut tar::Builder<W>, src: &Path, prefix: &str) -> Result<()> {
    let mut entries = fs::read_dir(src)
        .map_err(|e| io::Error::new(e.kind(), format!("Failed to read directory {}: {}", src.display(), e)))?
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| {
            StratumError::ConfigError(format!("non UTF-8 file name: {}", path.display()))
        })?;
        let tar_path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        let metadata = fs::symlink_metadata(&path)?;
        let mode = metadata.permissions().mode() & 0o7777;

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            let mut h = header(tar::EntryType::Symlink, 0o777, 0, 0, 0);
            builder.append_link(&mut h, &tar_path, &target)?;
        } else if metadata.is_dir() {
            append_dir_entry(builder, &tar_path, mode, 0, 0)?;
            append_tree(builder, &path, &tar_path)?;
        } else if metadata.is_file() {
            let mut h = header(tar::EntryType::Regular, mode, 0, 0, metadata.len());
            builder.append_data(&mut h, &tar_path, fs::File::open(&path)?)?;
        } else {
            tracing::warn!(path = %path.display(), "Skipping special file");
        }
    }
    Ok(())
}

/// Pack the realised contents of every artifact in `layer` under
/// `/store/<fingerprint>-<name>`.
pub fn write_artifact_layer(layer: &Layer, builder: &dyn Builder, blobs_dir: &Path) -> Result<LayerBlob> {
    let layout = ScaffoldLayout::default();
    let store_dir = layout.store_dir.trim_start_matches('/');

    let mut tar = start_layer(blobs_dir)?;
    append_dir_entry(&mut tar, store_dir, 0o755, 0, 0)?;

    for artifact in &layer.artifacts {
        let realised = builder.build(artifact)?;
        let prefix = format!("{}/{}", store_dir, artifact.store_name());
        append_dir_entry(&mut tar, &prefix, 0o755, 0, 0)?;
        append_tree(&mut tar, &realised.path, &prefix)?;
    }

    let blob = finish_layer(tar, blobs_dir)?;
    tracing::debug!(
        layer = %layer.digest,
        blob = %blob.prefixed_digest(),
        size = blob.size,
        "Wrote artifact layer"
    );
    Ok(blob)
}

/// Materialise the scaffold of `spec`. Files sourced from artifacts are
/// copied by value, following symlinks on the host.
pub fn write_scaffold_layer(spec: &ImageSpec, builder: &dyn Builder, blobs_dir: &Path) -> Result<LayerBlob> {
    let mut tar = start_layer(blobs_dir)?;

    for (path, entry) in spec.scaffold.iter() {
        let tar_path = path.trim_start_matches('/');
        match &entry.kind {
            EntryKind::Directory => {
                append_dir_entry(&mut tar, tar_path, entry.mode, entry.uid, entry.gid)?;
            }
            EntryKind::File {
                content: FileContent::Inline { text },
            } => {
                append_file_entry(&mut tar, tar_path, text.as_bytes(), entry.mode, entry.uid, entry.gid)?;
            }
            EntryKind::File {
                content:
                    FileContent::FromArtifact {
                        artifact, path: source, ..
                    },
            } => {
                let owner = spec
                    .artifacts()
                    .find(|a| a.name() == artifact)
                    .ok_or_else(|| StratumError::artifact_not_found(artifact.clone()))?;
                let realised = builder.build(owner)?;
                let file = resolve_inside(&realised.path, source).map_err(|message| StratumError::BuildError {
                    artifact: artifact.clone(),
                    message: format!("cannot read '{}' for {}: {}", source, path, message),
                })?;
                let data = fs::read(&file).map_err(|e| StratumError::BuildError {
                    artifact: artifact.clone(),
                    message: format!("cannot read '{}' for {}: {}", source, path, e),
                })?;
                append_file_entry(&mut tar, tar_path, &data, entry.mode, entry.uid, entry.gid)?;
            }
        }
    }

    let blob = finish_layer(tar, blobs_dir)?;
    tracing::debug!(
        image = %spec.reference(),
        blob = %blob.prefixed_digest(),
        size = blob.size,
        "Wrote scaffold layer"
    );
    Ok(blob)
}

/// Resolve `relative` under `root`, following symlinks, and require the
/// target to stay inside `root`.
fn resolve_inside(root: &Path, relative: &str) -> std::result::Result<PathBuf, String> {
    let root = root.canonicalize().map_err(|e| e.to_string())?;
    let resolved = root.join(relative).canonicalize().map_err(|e| e.to_string())?;
    if !resolved.starts_with(&root) {
        return Err(format!("resolves outside the artifact to {}", resolved.display()));
    }
    Ok(resolved)
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::PrebuiltStore;
    use crate::image::assemble;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use stratum_core::{ArtifactCatalog, ArtifactDef, Catalog, ImageOptions, Role};
    use tempfile::TempDir;

    fn read_entries(blob: &Path) -> Vec<(String, u64, u32, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(blob).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let mtime = e.header().mtime().unwrap();
                let mode = e.header().mode().unwrap();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, mtime, mode, data)
            })
            .collect()
    }

    fn setup() -> (TempDir, PrebuiltStore, Catalog) {
        let catalog = Catalog::new(
            "24.05",
            vec![
                ArtifactDef::new("hello", "1", "src:hello"),
                ArtifactDef::new("cacert", "2024", "src:cacert").with_attr(
                    crate::image::layout::CERT_FILE_ATTR,
                    stratum_core::AttrValue::text("etc/ssl/certs/ca-bundle.crt"),
                ),
            ],
        )
        .unwrap();

        let tmp = TempDir::new().unwrap();
        let hello = tmp.path().join(catalog.get("hello").unwrap().store_name());
        fs::create_dir_all(hello.join("bin")).unwrap();
        fs::write(hello.join("bin/hello"), "#!/bin/sh\necho hello\n").unwrap();
        fs::set_permissions(hello.join("bin/hello"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(hello.join("README"), "hi").unwrap();

        let cacert = tmp.path().join(catalog.get("cacert").unwrap().store_name());
        fs::create_dir_all(cacert.join("etc/ssl/certs")).unwrap();
        fs::write(cacert.join("etc/ssl/certs/real.pem"), "-----BEGIN CERTIFICATE-----\n").unwrap();
        std::os::unix::fs::symlink("real.pem", cacert.join("etc/ssl/certs/ca-bundle.crt")).unwrap();

        let store = PrebuiltStore::new(tmp.path());
        (tmp, store, catalog)
    }

    #[test]
    fn test_artifact_layer_contents() {
        let (_tmp, store, catalog) = setup();
        let hello = catalog.resolve("hello").unwrap();
        let out = TempDir::new().unwrap();

        let layer = Layer::new(vec![hello.clone()]);
        let blob = write_artifact_layer(&layer, &store, out.path()).unwrap();
        assert_eq!(blob.path, out.path().join(&blob.digest));
        assert_eq!(blob.digest, sha256_bytes(&fs::read(&blob.path).unwrap()));

        let entries = read_entries(&blob.path);
        let names: Vec<&str> = entries.iter().map(|e| e.0.as_str()).collect();
        let root = format!("store/{}", hello.store_name());
        assert_eq!(
            names,
            vec![
                "store/".to_string(),
                format!("{}/", root),
                format!("{}/README", root),
                format!("{}/bin/", root),
                format!("{}/bin/hello", root),
            ]
        );
        assert!(entries.iter().all(|e| e.1 == 0));
        assert_eq!(entries[4].2 & 0o777, 0o755);
    }

    #[test]
    fn test_layer_bytes_are_reproducible() {
        let (_tmp, store, catalog) = setup();
        let layer = Layer::new(vec![catalog.resolve("hello").unwrap()]);

        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let blob_a = write_artifact_layer(&layer, &store, a.path()).unwrap();
        let blob_b = write_artifact_layer(&layer, &store, b.path()).unwrap();
        assert_eq!(blob_a.digest, blob_b.digest);
        assert_eq!(blob_a.diff_id, blob_b.diff_id);
        assert_ne!(blob_a.digest, blob_a.diff_id);
    }

    #[test]
    fn test_scaffold_layer_copies_trust_bundle() {
        let (_tmp, store, catalog) = setup();
        let artifacts = vec![catalog.resolve("hello").unwrap(), catalog.resolve("cacert").unwrap()];
        let spec = assemble(&artifacts, Role::Runtime, &ImageOptions::new("x")).unwrap();

        let out = TempDir::new().unwrap();
        let blob = write_scaffold_layer(&spec, &store, out.path()).unwrap();
        let entries = read_entries(&blob.path);

        let bundle = entries
            .iter()
            .find(|e| e.0 == "etc/ssl/certs/ca-certificates.crt")
            .unwrap();
        assert_eq!(bundle.3, b"-----BEGIN CERTIFICATE-----\n");
        assert_eq!(bundle.2 & 0o7777, 0o444);

        let tmp_dir = entries.iter().find(|e| e.0 == "tmp/").unwrap();
        assert_eq!(tmp_dir.2 & 0o7777, 0o1777);

        let passwd = entries.iter().find(|e| e.0 == "etc/passwd").unwrap();
        assert!(String::from_utf8_lossy(&passwd.3).contains("app:x:1000:1000"));
    }

    #[test]
    fn test_trust_bundle_symlink_cannot_escape_artifact() {
        let (tmp, store, catalog) = setup();
        let cacert = catalog.resolve("cacert").unwrap();
        let certs = tmp.path().join(cacert.store_name()).join("etc/ssl/certs");

        let host = TempDir::new().unwrap();
        fs::write(host.path().join("secret"), "host only").unwrap();
        fs::remove_file(certs.join("ca-bundle.crt")).unwrap();
        std::os::unix::fs::symlink(host.path().join("secret"), certs.join("ca-bundle.crt")).unwrap();

        let spec = assemble(&[cacert], Role::Runtime, &ImageOptions::new("x")).unwrap();
        let out = TempDir::new().unwrap();
        match write_scaffold_layer(&spec, &store, out.path()).unwrap_err() {
            StratumError::BuildError { artifact, message } => {
                assert_eq!(artifact, "cacert");
                assert!(message.contains("outside the artifact"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_artifact_is_build_error() {
        let (_tmp, _store, catalog) = setup();
        let empty = TempDir::new().unwrap();
        let store = PrebuiltStore::new(empty.path());
        let layer = Layer::new(vec![catalog.resolve("hello").unwrap()]);

        let out = TempDir::new().unwrap();
        let err = write_artifact_layer(&layer, &store, out.path()).unwrap_err();
        assert!(matches!(err, StratumError::BuildError { .. }));
    }
}
