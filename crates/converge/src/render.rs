//! Console rendering for plans, apply reports and outputs.
//!
//! Sensitive output values never reach stdout here; only
//! [`OutputValue::display_value`] is printed.

use colored::Colorize;
use converge_cloud::{ActionType, ApplyReport, ItemStatus, OutputSet, Plan};

pub fn print_plan(plan: &Plan) {
    for item in &plan.items {
        // The create half carries the replacement marker for the pair.
        let line = match item.action {
            ActionType::Create if item.replace => {
                format!("-/+ {} (requires replacement)", item.resource).yellow()
            }
            ActionType::Destroy if item.replace => continue,
            ActionType::Create => format!("  + {}", item.resource).green(),
            ActionType::Update => format!("  ~ {}", item.resource).yellow(),
            ActionType::Destroy => format!("  - {}", item.resource).red(),
            ActionType::Replace | ActionType::NoOp => continue,
        };
        println!("{line}");
    }
    println!();
    println!("Plan: {}", plan.summary().to_string().bold());
}

pub fn print_report(report: &ApplyReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            ItemStatus::Succeeded => {
                println!(
                    "{} {} {}",
                    "✓".green(),
                    outcome.resource,
                    outcome.action.to_string().dimmed()
                );
            }
            ItemStatus::Unchanged => {}
            ItemStatus::Failed { error } => {
                println!("{} {} {}", "✗".red(), outcome.resource, error.red());
            }
            ItemStatus::NotAttempted => {
                println!(
                    "{} {} {}",
                    "·".dimmed(),
                    outcome.resource,
                    "not attempted".dimmed()
                );
            }
        }
    }
    println!();
    let summary = format!(
        "Apply finished in {}ms: {} applied, {} failed, {} not attempted",
        report.duration_ms,
        report.succeeded(),
        report.failed(),
        report.not_attempted()
    );
    if report.is_success() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

pub fn print_outputs(outputs: &OutputSet) {
    println!("{}", "Outputs:".bold());
    for output in outputs.iter() {
        println!("  {} = {}", output.name.cyan(), output.display_value());
    }
}
