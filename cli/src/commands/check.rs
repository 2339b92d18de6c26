//! `stratum check` command.
//!
//! Assembles every selected image without building anything, then compares
//! each pair against the layer-sharing guarantee.

use clap::Args;
use stratum_compose::image::sharing_matrix;
use stratum_compose::{ImageSpec, Project};

use crate::output;

#[derive(Args)]
pub struct CheckArgs {
    /// Only check images whose name or role contains this string
    pub filter: Option<String>,

    /// Print the overlay chain report
    #[arg(long)]
    pub overlays: bool,
}

pub async fn execute(args: CheckArgs, project: Project) -> Result<(), Box<dyn std::error::Error>> {
    if args.overlays {
        print_chain_report(&project);
    }

    let mut specs: Vec<ImageSpec> = Vec::new();
    let mut failed = 0usize;
    let mut table = output::new_table(&["TARGET", "IMAGE", "ARTIFACTS", "LAYERS", "STATUS"]);

    for decl in project.select(args.filter.as_deref()) {
        match project.plan(&decl.name) {
            Ok(spec) => {
                table.add_row([
                    decl.name.clone(),
                    spec.reference(),
                    spec.artifacts().count().to_string(),
                    spec.total_layers().to_string(),
                    "ok".to_string(),
                ]);
                specs.push(spec);
            }
            Err(e) => {
                eprintln!("{}: {}", decl.name, e);
                table.add_row([
                    decl.name.clone(),
                    decl.image_options().reference(),
                    "-".to_string(),
                    "-".to_string(),
                    "error".to_string(),
                ]);
                failed += 1;
            }
        }
    }
    println!("{table}");

    let reports = sharing_matrix(&specs);
    let mut violations = 0usize;
    if !reports.is_empty() {
        let mut sharing = output::new_table(&["LEFT", "RIGHT", "COMMON", "EXPECTED", "SHARED", "OK"]);
        for report in &reports {
            if !report.holds() {
                violations += 1;
            }
            let ok = if report.same_snapshot {
                output::yes_no(report.holds()).to_string()
            } else {
                "n/a".to_string()
            };
            sharing.add_row([
                report.left.clone(),
                report.right.clone(),
                report.common_artifacts.to_string(),
                report.expected_layers.to_string(),
                report.shared_layers.to_string(),
                ok,
            ]);
        }
        println!();
        println!("{sharing}");
    }

    if failed > 0 {
        return Err(format!("{failed} image(s) failed to assemble").into());
    }
    if violations > 0 {
        return Err(format!("{violations} image pair(s) violate layer sharing").into());
    }
    Ok(())
}

fn print_chain_report(project: &Project) {
    let report = project.chain_report();
    let mut table = output::new_table(&["RULE", "ACTION", "REPLACED", "INVALIDATED"]);
    for step in &report.steps {
        let replaced: Vec<&str> = step.replaced.iter().map(|r| r.name.as_str()).collect();
        table.add_row([
            step.rule.clone(),
            step.action.clone(),
            replaced.join(", "),
            step.invalidated.join(", "),
        ]);
    }
    println!("{table}");

    for double in &report.double_overrides {
        eprintln!(
            "warning: '{}' replaced by both '{}' and '{}'",
            double.name, double.first_rule, double.second_rule
        );
    }
    println!();
}
