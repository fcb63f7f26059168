//! MapManager CLI - Command-line interface
//!
//! Manages the offline map, geocoder and address-parser data in the storage
//! directory through the MapManager library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::list::ListKind;
use error::CliError;
use runner::{CliRunner, GlobalOptions};

#[derive(Parser)]
#[command(name = "mapmanager")]
#[command(version = mapmanager::VERSION)]
#[command(about = "Manage offline map, geocoder and address-parser data", long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir/mapmanager/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory, overriding [storage] root from the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Also print log messages to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage, catalog and missing data
    Status,

    /// List provided, requested or installed datasets
    List {
        /// Which datasets to list
        #[arg(value_enum, default_value_t = ListKind::Requested)]
        kind: ListKind,

        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },

    /// Request a dataset (e.g. territory/estonia)
    Add {
        /// Dataset id
        id: String,
    },

    /// Stop requesting a dataset
    Remove {
        /// Dataset id
        id: String,
    },

    /// Show details of a dataset
    Info {
        /// Dataset id
        id: String,

        /// Print the raw JSON object
        #[arg(long)]
        json: bool,
    },

    /// Fetch the distribution URL and the catalog
    Refresh,

    /// Download everything missing for the requested datasets
    Download,

    /// Check requested datasets for newer versions
    Updates {
        /// Install the updates that were found
        #[arg(long)]
        install: bool,
    },

    /// Delete files no requested dataset needs
    Cleanup {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let options = GlobalOptions {
        config: cli.config,
        root: cli.root,
        verbose: cli.verbose,
    };
    let mut runner = CliRunner::new(&options)?;
    runner.log_startup(command_name(&cli.command));

    match cli.command {
        Commands::Status => commands::status::run(&runner),
        Commands::List { kind, json } => commands::list::run(&runner, kind, json),
        Commands::Add { id } => commands::dataset::run_add(&mut runner, &id),
        Commands::Remove { id } => commands::dataset::run_remove(&mut runner, &id),
        Commands::Info { id, json } => commands::dataset::run_info(&runner, &id, json),
        Commands::Refresh => commands::transfer::run_refresh(&mut runner).await,
        Commands::Download => commands::transfer::run_download(&mut runner).await,
        Commands::Updates { install } => commands::transfer::run_updates(&mut runner, install).await,
        Commands::Cleanup { yes } => commands::cleanup::run(&mut runner, yes),
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status => "status",
        Commands::List { .. } => "list",
        Commands::Add { .. } => "add",
        Commands::Remove { .. } => "remove",
        Commands::Info { .. } => "info",
        Commands::Refresh => "refresh",
        Commands::Download => "download",
        Commands::Updates { .. } => "updates",
        Commands::Cleanup { .. } => "cleanup",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_with_global_root() {
        let cli = Cli::try_parse_from(["mapmanager", "list", "provided", "--root", "/srv/maps"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/srv/maps")));
        assert!(matches!(
            cli.command,
            Commands::List {
                kind: ListKind::Provided,
                json: false
            }
        ));
    }

    #[test]
    fn test_list_defaults_to_requested() {
        let cli = Cli::try_parse_from(["mapmanager", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                kind: ListKind::Requested,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_cleanup_yes() {
        let cli = Cli::try_parse_from(["mapmanager", "cleanup", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Cleanup { yes: true }));
    }
}
