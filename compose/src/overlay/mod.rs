//! Overlay chain
//!
//! Rewrite rules replace a small set of artifacts in a base catalog (a
//! security patch, a relicensed fork, a rebuild against a patched library)
//! without copying the catalog. Rules run in order and each one sees the
//! catalog produced by the rules before it.

pub mod actions;
pub mod chain;
pub mod rule;

pub use actions::{RewriteAction, BUILT_AGAINST_PREFIX};
pub use chain::{
    apply, ChainOptions, ChainReport, DoubleOverride, Overlaid, OverlayChain, Replacement, RuleStep,
};
pub use rule::{Rewrite, RewriteRule};
