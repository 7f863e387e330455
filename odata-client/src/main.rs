use clap::Parser;

use odata_client::cli::commands::{batch, query};
use odata_client::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let service_root = cli.service_root.as_deref();
    match cli.command {
        Commands::Query(args) => query::handle_query_command(args, service_root).await,
        Commands::Batch(args) => batch::handle_batch_command(args, service_root).await,
    }
}
