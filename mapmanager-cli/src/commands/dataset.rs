//! Add, remove and info commands for single datasets.

use console::style;
use mapmanager::storage::format_size;
use mapmanager::DatasetId;
use serde_json::Value;

use super::common::{field, size_field, styled_status};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Add a dataset to the requested set.
pub fn run_add(runner: &mut CliRunner, id: &str) -> Result<(), CliError> {
    let id = DatasetId::new(id);
    let manager = runner.manager_mut();
    if manager.add_dataset(&id)? {
        println!("{} Requested {}", style("✓").green(), id);
    } else {
        println!("{} is already requested", id);
    }

    if manager.missing() {
        println!();
        println!("To download:");
        for line in manager.missing_info().lines() {
            println!("  {}", line);
        }
        println!();
        println!("Run 'mapmanager download' to fetch it.");
    }
    Ok(())
}

/// Remove a dataset from the requested set.
pub fn run_remove(runner: &mut CliRunner, id: &str) -> Result<(), CliError> {
    let id = DatasetId::new(id);
    if runner.manager_mut().remove_dataset(&id)? {
        println!("{} No longer requested: {}", style("✓").green(), id);
        println!("Its files stay on disk until 'mapmanager cleanup'.");
    } else {
        println!("{} was not requested", id);
    }
    Ok(())
}

/// Show everything known about one dataset.
pub fn run_info(runner: &CliRunner, id: &str, json: bool) -> Result<(), CliError> {
    let details = runner.manager().dataset_details(&DatasetId::new(id))?;
    if json {
        println!("{}", details);
        return Ok(());
    }

    let details: Value = serde_json::from_str(&details)
        .map_err(|e| CliError::Config(format!("unexpected manager output: {}", e)))?;

    println!("{}", style(field(&details, "name")).bold());
    println!("  Id:        {}", field(&details, "id"));
    println!("  Kind:      {}", field(&details, "kind"));
    println!("  Version:   {}", field(&details, "version"));
    println!("  Size:      {}", size_field(&details, "size"));
    println!("  With deps: {}", size_field(&details, "closure_size"));
    println!(
        "  Requested: {}",
        if details["requested"].as_bool().unwrap_or(false) {
            "yes"
        } else {
            "no"
        }
    );
    println!("  Status:    {}", styled_status(field(&details, "status")));

    if let Some(files) = details["files"].as_array().filter(|files| !files.is_empty()) {
        println!();
        println!("Files:");
        for file in files {
            println!(
                "  {} (version {}, installed {})",
                field(file, "path"),
                field(file, "version"),
                field(file, "installed_at")
            );
        }
    }

    if let Some(deps) = details["dependencies"].as_array().filter(|deps| !deps.is_empty()) {
        println!();
        println!("Needs:");
        for dep in deps {
            println!(
                "  {:<32} {:>10}  {}",
                field(dep, "id"),
                format_size(dep["size"].as_u64().unwrap_or(0)),
                styled_status(field(dep, "status"))
            );
        }
    }
    Ok(())
}
