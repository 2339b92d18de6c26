//! `stratum plan` command.

use clap::Args;
use stratum_compose::Project;

#[derive(Args)]
pub struct PlanArgs {
    /// Image target to plan
    pub target: String,

    /// Print compact JSON on a single line
    #[arg(long)]
    pub compact: bool,
}

pub async fn execute(args: PlanArgs, project: Project) -> Result<(), Box<dyn std::error::Error>> {
    let spec = project
        .plan(&args.target)
        .map_err(|e| format!("{}: {}", args.target, e))?;

    let json = if args.compact {
        serde_json::to_string(&spec)?
    } else {
        serde_json::to_string_pretty(&spec)?
    };
    println!("{json}");
    Ok(())
}
