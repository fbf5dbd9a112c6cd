//! Output formatting for CLI responses

use anyhow::{Error, Result};
use bmcfw_errors::UpdateError;
use bmcfw_firmware_update::UpdateConfig;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;

use crate::commands::checksum::ChecksumReport;
use crate::commands::components::ComponentRow;
use crate::commands::inspect::InspectReport;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let category = error
        .downcast_ref::<UpdateError>()
        .map(|e| e.category().to_string());
    let error_json = json!({
        "success": false,
        "error": {
            "message": format!("{error:#}"),
            "category": category,
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
    }
}

fn print_success_json<T: Serialize>(key: &str, value: &T) -> Result<()> {
    let output = json!({
        "success": true,
        key: value,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print a checksum report
pub fn print_checksum(report: &ChecksumReport, json: bool) -> Result<()> {
    if json {
        return print_success_json("checksum", report);
    }
    println!("{}  {}", report.value.bold(), report.file);
    println!("  {} {} over {} bytes", "Algorithm:".dimmed(), report.algorithm, report.size);
    Ok(())
}

/// Print an inspection report
pub fn print_inspect(report: &InspectReport, json: bool) -> Result<()> {
    if json {
        return print_success_json("inspect", report);
    }

    println!(
        "{} {} ({} image{})",
        report.file.bold(),
        report.format.to_string().cyan(),
        report.images.len(),
        if report.images.len() == 1 { "" } else { "s" }
    );
    if let Some(bundle) = &report.bundle {
        let mode = if bundle.recovery { "recovery".yellow() } else { "in place".green() };
        println!(
            "  Update: {mode}, activation mask {:#04x}, {} payload bytes",
            bundle.mask, bundle.total_len
        );
    }
    for (i, entry) in report.images.iter().enumerate() {
        match entry.kind {
            Some(kind) => println!("{} {}", "●".green(), kind.to_string().bold()),
            None => println!("{} image {}", "●".green(), i + 1),
        }
        for line in entry.summary.to_string().lines() {
            println!("    {line}");
        }
    }
    println!("{}", "Image is valid".green());
    Ok(())
}

/// Print the component table
pub fn print_components(slot: u8, rows: &[ComponentRow], json: bool) -> Result<()> {
    if json {
        return print_success_json("components", &rows);
    }

    println!("{}", format!("Components on slot{slot}:").bold());
    for row in rows {
        println!("  {} {}", "●".green(), row.name.bold());
        println!("    Route:   {}", row.route);
        if let Some(device) = &row.device {
            println!("    Device:  {device}");
        }
        println!("    Lease:   {}", row.lease);
        println!("    Formats: {}", row.formats.join(", "));
    }
    Ok(())
}

/// Print an update configuration
pub fn print_config(config: &UpdateConfig, json: bool) -> Result<()> {
    if json {
        return print_success_json("config", config);
    }
    println!("{}", "Configuration is valid".green());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
