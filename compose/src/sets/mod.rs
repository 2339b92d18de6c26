//! Package sets
//!
//! Named, ordered lists of artifact references. A set entry is either an
//! artifact (optionally qualified with a named source catalog) or a
//! reference to another set, written as:
//!
//! - `python3` - artifact from the primary catalog
//! - `unstable:python3` - artifact from the source catalog named `unstable`
//! - `@core` - every artifact of the set `core`, in order

mod registry;

pub use registry::{PackageSet, PackageSetRegistry, SetEntry, Sources};
