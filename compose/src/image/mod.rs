//! Image assembly
//!
//! Turns an ordered artifact list and a role into an [`ImageSpec`]: packed
//! artifact layers, the synthesized filesystem scaffold and the runtime
//! configuration.

pub mod assembler;
pub mod layers;
pub mod layout;
pub mod runtime_config;
pub mod scaffold;
pub mod sharing;

pub use assembler::{assemble, ImageAssembler, ImageSpec};
pub use layers::{artifact_slots, pack_layers, Layer};
pub use layout::ScaffoldLayout;
pub use runtime_config::{merge_json, RuntimeConfig};
pub use scaffold::{
    find_trust_bundle, EntryKind, FileContent, FilesystemScaffold, ScaffoldBuilder, ScaffoldEntry,
    TrustBundle,
};
pub use sharing::{shared_prefix, sharing_matrix, verify_prefix_sharing, SharingReport};
