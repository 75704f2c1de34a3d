//! Terminal output: headers, status lines, spinners and tables.

use crate::distribution::{join_tags, DistributionTable};
use crate::publish::{MetadataStatus, PublicAccess, PublishOutcome};
use colored::*;
use comfy_table::{presets::*, Attribute, Cell, ContentArrangement, Table, TableComponent};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TABLE_WIDTH: u16 = 100;

pub fn print_header(title: &str) {
    println!("\n{}", title.bright_blue().bold());
    println!("{}", "─".repeat(TABLE_WIDTH as usize).bright_black());
}

pub fn print_step(message: &str) {
    println!("{} {}", "→".bright_black(), message);
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow().bold(), message.yellow());
}

/// Creates a ticking spinner. Call `finish_and_clear` when done.
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_style(TableComponent::BottomBorder, '─')
        .set_style(TableComponent::BottomBorderIntersections, '─')
        .set_style(TableComponent::HeaderLines, '─')
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(TABLE_WIDTH);
    table
}

fn bold(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

fn public_access_label(access: &PublicAccess) -> String {
    match access {
        PublicAccess::NotRequested => "not requested".to_string(),
        PublicAccess::Unchanged => "unchanged".to_string(),
        PublicAccess::AlreadyPublic => "already public".to_string(),
        PublicAccess::Granted => "granted".to_string(),
        PublicAccess::Failed(reason) => format!("failed: {}", reason),
    }
}

fn metadata_label(status: &MetadataStatus) -> String {
    match status {
        MetadataStatus::Written => "written".to_string(),
        MetadataStatus::Repaired => "repaired".to_string(),
        MetadataStatus::AlreadyPresent => "already present".to_string(),
        MetadataStatus::Failed(reason) => format!("failed: {}", reason),
    }
}

pub fn print_publish_outcome(outcome: &PublishOutcome) {
    print_header(&format!(
        "Layer {} ({})",
        outcome.layer_name, outcome.region
    ));
    let mut table = base_table();
    table.set_header(vec![bold("Property"), bold("Value")]);
    table.add_row(vec![Cell::new("ARN"), Cell::new(&outcome.layer_arn)]);
    table.add_row(vec![Cell::new("Version"), Cell::new(outcome.version)]);
    table.add_row(vec![
        Cell::new("Status"),
        Cell::new(if outcome.reused {
            "reused existing version"
        } else {
            "published new version"
        }),
    ]);
    table.add_row(vec![Cell::new("Distribution"), Cell::new(&outcome.distribution)]);
    if let Some(arch) = &outcome.architecture {
        table.add_row(vec![Cell::new("Architecture"), Cell::new(arch)]);
    }
    if let Some(version) = &outcome.collector_version {
        table.add_row(vec![Cell::new("Collector Version"), Cell::new(version)]);
    }
    table.add_row(vec![Cell::new("SHA256"), Cell::new(&outcome.content_hash)]);
    table.add_row(vec![
        Cell::new("Public Access"),
        Cell::new(public_access_label(&outcome.public_access)),
    ]);
    table.add_row(vec![
        Cell::new("Metadata"),
        Cell::new(metadata_label(&outcome.metadata)),
    ]);
    println!("{table}");

    if let Some(previous) = &outcome.previous_version {
        print_step(&format!(
            "Previous version {} had a different content hash",
            previous.version
        ));
    }
    if outcome.metadata.is_failure() {
        print_warning("Layer is published but its metadata record could not be written");
    }
    if let PublicAccess::Failed(_) = outcome.public_access {
        print_warning("Layer is published but could not be made public");
    }
}

/// Lists distributions with their resolved build tags. Distributions that
/// fail to resolve are shown with the error instead of tags.
pub fn print_distributions(table: &DistributionTable) {
    print_header("Distributions");
    let mut out = base_table();
    out.set_header(vec![bold("Name"), bold("Base"), bold("Build Tags"), bold("Description")]);
    for distribution in table.iter() {
        let tags = match table.resolve(&distribution.name) {
            Ok(tags) if tags.is_empty() => "(upstream default)".to_string(),
            Ok(tags) => join_tags(&tags),
            Err(e) => format!("error: {}", e).red().to_string(),
        };
        out.add_row(vec![
            Cell::new(&distribution.name),
            Cell::new(distribution.base.as_deref().unwrap_or("-")),
            Cell::new(tags),
            Cell::new(distribution.description.as_deref().unwrap_or("")),
        ]);
    }
    println!("{out}");
}

pub fn print_list(title: &str, items: &[String]) {
    print_header(title);
    if items.is_empty() {
        println!("  {}", "(none)".bright_black());
    }
    for item in items {
        println!("  {}", item);
    }
}
