//! Stratum Core - Foundational Types and Abstractions
//!
//! Artifacts and their fingerprints, the immutable catalog, image options
//! with role defaults, and the error taxonomy shared by every Stratum crate.

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactDef, AttrValue, Fingerprint, Metadata, Recipe};
pub use catalog::{ArtifactCatalog, Catalog};
pub use config::{validate_dir, EffectiveOptions, ImageOptions, Role, RoleDefaults, UserSpec};
pub use error::{Result, StratumError};

/// Stratum version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
