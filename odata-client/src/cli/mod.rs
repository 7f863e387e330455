//! Command-line interface for the `odata` binary

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "odata", version, about = "Query and batch against OData v4 services")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Service root URL (overrides config file and ODATA_SERVICE_ROOT)
    #[arg(long, global = true)]
    pub service_root: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and run a query against an entity set
    Query(commands::query::QueryCommands),
    /// Submit a batch of operations described in a JSON file
    Batch(commands::batch::BatchCommands),
}

/// How query results are printed
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    JsonCompact,
    Csv,
}
