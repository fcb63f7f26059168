//! Cleanup command - delete files no requested dataset needs.

use console::style;
use dialoguer::Confirm;
use mapmanager::storage::format_size;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the cleanup command.
pub fn run(runner: &mut CliRunner, yes: bool) -> Result<(), CliError> {
    let manager = runner.manager_mut();
    let unneeded = manager.list_unneeded();

    if !unneeded.is_available() {
        println!(
            "{}",
            style("Cleanup is not possible right now.").yellow()
        );
        println!("It needs usable storage, a loaded catalog and an open file registry.");
        return Ok(());
    }
    if unneeded.files.is_empty() {
        println!("{} Nothing to clean up.", style("✓").green());
        return Ok(());
    }

    let root = manager.config().storage_root.clone();
    println!("Files not needed by any requested dataset:");
    for path in &unneeded.files {
        let display = path.strip_prefix(&root).unwrap_or(path.as_path());
        println!("  {}", display.display());
    }
    println!();
    let total = format_size(unneeded.total_bytes.max(0) as u64);
    println!("Total: {} in {} files", total, unneeded.files.len());

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete these files and free {}?", total))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Nothing deleted.");
            return Ok(());
        }
    }

    let report = manager.delete_unneeded(&unneeded.files)?;
    println!(
        "{} Deleted {} files",
        style("✓").green(),
        report.deleted.len()
    );
    if let Some((path, reason)) = &report.failed {
        println!(
            "{} Could not delete {}: {}",
            style("✗").red(),
            path.display(),
            reason
        );
        println!("{} files were left in place.", report.remaining.len());
    }
    Ok(())
}
