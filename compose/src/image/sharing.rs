//! Layer sharing between images.
//!
//! Images assembled from one snapshot whose artifact lists share a prefix
//! must share the corresponding single-artifact layers byte for byte. These
//! helpers measure what two specs actually share and whether that meets the
//! guarantee.

use serde::Serialize;

use super::assembler::ImageSpec;

/// Number of leading layers with equal digests.
pub fn shared_prefix(a: &ImageSpec, b: &ImageSpec) -> usize {
    a.layers
        .iter()
        .zip(b.layers.iter())
        .take_while(|(x, y)| x.digest == y.digest)
        .count()
}

/// Outcome of comparing two images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingReport {
    pub left: String,
    pub right: String,
    pub same_snapshot: bool,
    /// Leading artifacts with equal fingerprints
    pub common_artifacts: usize,
    /// Leading layers the invariant guarantees to be shared
    pub expected_layers: usize,
    /// Leading layers actually shared
    pub shared_layers: usize,
}

impl SharingReport {
    /// Sharing is only guaranteed within one snapshot.
    pub fn holds(&self) -> bool {
        !self.same_snapshot || self.shared_layers >= self.expected_layers
    }
}

/// Compare two images against the prefix-sharing guarantee.
pub fn verify_prefix_sharing(a: &ImageSpec, b: &ImageSpec) -> SharingReport {
    let same_snapshot = a.snapshot == b.snapshot;
    let common_artifacts = a
        .artifacts()
        .zip(b.artifacts())
        .take_while(|(x, y)| x.name() == y.name() && x.substitutable_for(y))
        .count();
    let expected_layers = common_artifacts
        .min(leading_single_layers(a))
        .min(leading_single_layers(b));

    let report = SharingReport {
        left: a.reference(),
        right: b.reference(),
        same_snapshot,
        common_artifacts,
        expected_layers,
        shared_layers: shared_prefix(a, b),
    };

    if !same_snapshot {
        tracing::warn!(
            left = %report.left,
            right = %report.right,
            "Images come from different snapshots; layer sharing is not guaranteed"
        );
    } else if !report.holds() {
        tracing::warn!(
            left = %report.left,
            right = %report.right,
            expected = report.expected_layers,
            shared = report.shared_layers,
            "Images share fewer layers than their common prefix requires"
        );
    }
    report
}

/// Compare every pair of images, in input order.
pub fn sharing_matrix(specs: &[ImageSpec]) -> Vec<SharingReport> {
    let mut reports = Vec::new();
    for (i, a) in specs.iter().enumerate() {
        for b in &specs[i + 1..] {
            reports.push(verify_prefix_sharing(a, b));
        }
    }
    reports
}

fn leading_single_layers(spec: &ImageSpec) -> usize {
    spec.layers
        .iter()
        .take_while(|l| l.artifacts.len() == 1)
        .count()
}
