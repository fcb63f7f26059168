//! List command - provided, requested or installed datasets.

use clap::ValueEnum;

use super::common::{field, json_rows, size_field, styled_status};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Which datasets to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    /// Territories offered by the catalog
    Provided,
    /// Datasets you asked to keep installed
    #[default]
    Requested,
    /// Datasets currently installed
    Available,
}

/// Run the list command.
pub fn run(runner: &CliRunner, kind: ListKind, json: bool) -> Result<(), CliError> {
    let manager = runner.manager();
    let listing = match kind {
        ListKind::Provided => manager.list_provided(),
        ListKind::Requested => manager.list_requested(),
        ListKind::Available => manager.list_available(),
    };

    if json {
        println!("{}", listing);
        return Ok(());
    }

    let rows = json_rows(&listing)?;
    if rows.is_empty() {
        match kind {
            ListKind::Provided => println!("No catalog loaded. Run 'mapmanager refresh' first."),
            ListKind::Requested => println!("Nothing requested. Add a territory with 'mapmanager add <id>'."),
            ListKind::Available => println!("No datasets installed."),
        }
        return Ok(());
    }

    let id_width = rows.iter().map(|row| field(row, "id").len()).max().unwrap_or(0);
    for row in &rows {
        let status = field(row, "status");
        let status = if status.is_empty() {
            String::new()
        } else {
            styled_status(status).to_string()
        };
        println!(
            "{:<id_width$}  {:<28} {:>10}  {}",
            field(row, "id"),
            field(row, "name"),
            size_field(row, "size"),
            status,
            id_width = id_width
        );
    }
    Ok(())
}
