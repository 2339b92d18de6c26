//! Image output
//!
//! The [`Builder`] seam locates realised artifact contents; the
//! [`ImageWriter`] turns an image spec into an OCI image layout directory or
//! a single tar archive.

mod layer;
pub mod store;
pub mod writer;

pub use layer::{sha256_bytes, write_artifact_layer, write_scaffold_layer, LayerBlob};
pub use store::{ArtifactPath, Builder, PrebuiltStore};
pub use writer::{ImageWriter, WrittenImage};
