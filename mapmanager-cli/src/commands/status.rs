//! Status command - show storage, catalog and missing data.

use console::style;

use super::common::print_header;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the status command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    let manager = runner.manager();
    let config = manager.config();

    print_header(&format!("MapManager v{}", mapmanager::VERSION));
    println!();

    let storage = if !config.has_storage_root() {
        style("not configured".to_string()).red()
    } else if manager.storage_available() {
        style(format!("{} (available)", config.storage_root.display())).green()
    } else {
        style(format!("{} (unavailable)", config.storage_root.display())).red()
    };
    println!("Storage:      {}", storage);
    println!("Config file:  {}", runner.config_path().display());
    println!("Distribution: {}", manager.base_url());
    println!(
        "Address search: {}",
        if config.features.address_search {
            "enabled"
        } else {
            "disabled"
        }
    );

    match manager.catalog() {
        Some(catalog) => println!("Catalog:      {} datasets", catalog.len()),
        None => println!("Catalog:      {}", style("not loaded (run 'mapmanager refresh')").yellow()),
    }
    println!("Requested:    {}", manager.requested().len());
    println!();

    if manager.missing() {
        println!("{}", style("Missing data:").yellow().bold());
        for line in manager.missing_info().lines() {
            println!("  {}", line);
        }
        println!();
        println!("Run 'mapmanager download' to fetch it.");
    } else {
        println!("{}", style("All requested data is installed.").green());
    }

    Ok(())
}
