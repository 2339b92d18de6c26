//! Stratum Compose
//!
//! Overlay chains over an artifact catalog, composable package sets, and
//! deterministic image assembly with layer sharing across images.

pub mod archive;
pub mod image;
pub mod overlay;
pub mod project;
pub mod sets;

pub use archive::{ArtifactPath, Builder, ImageWriter, PrebuiltStore, WrittenImage};
pub use image::{
    assemble, shared_prefix, verify_prefix_sharing, FilesystemScaffold, ImageAssembler, ImageSpec, Layer,
    RuntimeConfig, SharingReport,
};
pub use overlay::{ChainOptions, ChainReport, OverlayChain, RewriteAction, RewriteRule};
pub use project::{ImageDecl, Project, ProjectFile, PROJECT_FILE};
pub use sets::{PackageSet, PackageSetRegistry, SetEntry, Sources};
