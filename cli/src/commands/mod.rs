//! CLI command definitions and dispatch.

mod build;
mod check;
mod list;
mod plan;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use stratum_compose::{Project, PROJECT_FILE};

/// Stratum - layered OCI images from composable package sets.
#[derive(Parser)]
#[command(name = "stratum", version = stratum_core::VERSION, about)]
pub struct Cli {
    /// Project file
    #[arg(short, long, global = true, default_value = PROJECT_FILE)]
    pub file: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build images and write them as OCI archives
    Build(build::BuildArgs),
    /// Print the assembled image spec of one target as JSON
    Plan(plan::PlanArgs),
    /// List the images declared in the project
    List(list::ListArgs),
    /// Assemble images and verify layer sharing between them
    Check(check::CheckArgs),
}

/// Return the directory of prebuilt artifacts ($STRATUM_STORE or ~/.stratum/store).
pub(crate) fn store_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("STRATUM_STORE") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".stratum"))
        .unwrap_or_else(|| PathBuf::from(".stratum"))
        .join("store")
}

/// Load the project file, naming it in the error.
pub(crate) fn load_project(path: &Path) -> Result<Project, Box<dyn std::error::Error>> {
    Project::load(path).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let project = load_project(&cli.file)?;
    match cli.command {
        Command::Build(args) => build::execute(args, project).await,
        Command::Plan(args) => plan::execute(args, project).await,
        Command::List(args) => list::execute(args, project).await,
        Command::Check(args) => check::execute(args, project).await,
    }
}
