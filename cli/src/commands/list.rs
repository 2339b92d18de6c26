//! `stratum list` command.

use clap::Args;
use stratum_compose::Project;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only show images whose name or role contains this string
    pub filter: Option<String>,

    /// Only show target names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ListArgs, project: Project) -> Result<(), Box<dyn std::error::Error>> {
    let images = project.select(args.filter.as_deref());

    if args.quiet {
        for image in &images {
            println!("{}", image.name);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["TARGET", "ROLE", "IMAGE", "SETS"]);
    for image in &images {
        let options = image.image_options();
        table.add_row([
            image.name.clone(),
            image.role.to_string(),
            options.reference(),
            image.sets.join(" ++ "),
        ]);
    }

    println!("{table}");
    Ok(())
}
