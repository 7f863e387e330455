pub mod handler;

use std::path::PathBuf;

use clap::Args;

pub use handler::handle_batch_command;

#[derive(Args, Debug)]
pub struct BatchCommands {
    /// JSON file with an array of operations; `{"changeset": [...]}` entries
    /// group mutations atomically
    pub file: PathBuf,

    /// Use the JSON batch format regardless of the configured one
    #[arg(long)]
    pub json_format: bool,

    /// Print the encoded request body instead of submitting it
    #[arg(long)]
    pub dry: bool,
}
