pub mod handler;

use std::path::PathBuf;

use clap::Args;

use crate::cli::OutputFormat;

pub use handler::handle_query_command;

#[derive(Args, Debug, Default)]
pub struct QueryCommands {
    /// Entity set to query (e.g. "People")
    pub entity_set: String,

    /// Filter as a lambda predicate, e.g. "x => x.Age >= 18 && x.Name.startswith('A')"
    #[arg(long)]
    pub filter: Option<String>,

    /// Comma-separated fields to select; "Nav/Field" selects through a navigation
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Comma-separated navigation properties to expand
    #[arg(long, value_delimiter = ',')]
    pub expand: Vec<String>,

    /// Sort clause such as "Name" or "Created desc" (repeatable)
    #[arg(long)]
    pub orderby: Vec<String>,

    #[arg(long)]
    pub top: Option<u32>,

    #[arg(long)]
    pub skip: Option<u32>,

    /// Request the total count
    #[arg(long)]
    pub count: bool,

    /// Free-text search
    #[arg(long)]
    pub search: Option<String>,

    /// Address a single entity by key
    #[arg(long)]
    pub key: Option<String>,

    /// Follow next links and return every page
    #[arg(long)]
    pub all: bool,

    /// Print the request URL instead of executing it
    #[arg(long)]
    pub dry: bool,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Write results to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}
