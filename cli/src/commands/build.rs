//! `stratum build` command - Assemble images and write them as OCI archives.
//!
//! Every target is planned and written on its own blocking task. A failing
//! target is reported and does not stop the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use stratum_compose::{ImageWriter, PrebuiltStore, Project, WrittenImage};

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Image targets to build (default: every image in the project)
    pub targets: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = "out")]
    pub out: PathBuf,

    /// Directory of prebuilt artifacts (default: $STRATUM_STORE or ~/.stratum/store)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Write OCI layout directories instead of tar archives
    #[arg(long)]
    pub layout: bool,
}

pub async fn execute(args: BuildArgs, project: Project) -> Result<(), Box<dyn std::error::Error>> {
    let targets: Vec<String> = if args.targets.is_empty() {
        project.images().iter().map(|i| i.name.clone()).collect()
    } else {
        args.targets.clone()
    };
    if targets.is_empty() {
        return Err("no images declared in the project".into());
    }

    let project = Arc::new(project);
    let store = Arc::new(PrebuiltStore::new(args.store.clone().unwrap_or_else(super::store_dir)));
    tracing::debug!(store = %store.root().display(), targets = targets.len(), "Building images");

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let project = Arc::clone(&project);
        let store = Arc::clone(&store);
        let out = args.out.clone();
        let layout = args.layout;
        let name = target.clone();
        let handle =
            tokio::task::spawn_blocking(move || build_target(&project, &store, &target, &out, layout));
        handles.push((name, handle));
    }

    let total = handles.len();
    let mut failed = 0usize;
    let mut table = output::new_table(&["TARGET", "IMAGE", "LAYERS", "SIZE", "MANIFEST", "OUTPUT"]);
    for (target, handle) in handles {
        match handle.await? {
            Ok(written) => {
                table.add_row([
                    target,
                    written.reference.clone(),
                    written.layers.len().to_string(),
                    output::format_bytes(written.layers_size()),
                    output::short_digest(&written.manifest_digest),
                    written.path.display().to_string(),
                ]);
            }
            Err(e) => {
                eprintln!("{target}: {e}");
                failed += 1;
            }
        }
    }

    if failed < total {
        println!("{table}");
    }
    if failed > 0 {
        return Err(format!("{failed} of {total} target(s) failed").into());
    }
    Ok(())
}

fn build_target(
    project: &Project,
    store: &PrebuiltStore,
    target: &str,
    out: &Path,
    layout: bool,
) -> stratum_core::Result<WrittenImage> {
    let spec = project.plan(target)?;
    let writer = ImageWriter::new(store);
    if layout {
        writer.write_layout(&spec, &out.join(target))
    } else {
        writer.write_archive(&spec, &out.join(format!("{target}.tar")))
    }
}
