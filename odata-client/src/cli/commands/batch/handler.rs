//! Batch command handler

use anyhow::{Context, Result};
use colored::*;
use serde::Deserialize;
use std::fs;

use super::BatchCommands;
use crate::api::ODataClient;
use crate::api::operations::{BatchFormat, BatchRequest, BatchRequestBuilder, Operation};
use crate::cli::commands::load_config;

/// One entry of a batch file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchFileItem {
    Changeset { changeset: Vec<Operation> },
    Single(Operation),
}

/// Handle the batch command
pub async fn handle_batch_command(args: BatchCommands, service_root: Option<&str>) -> Result<()> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read batch file: {}", args.file.display()))?;
    let batch = parse_batch_file(&content)
        .with_context(|| format!("Invalid batch file: {}", args.file.display()))?;

    let requested = args.json_format.then_some(BatchFormat::Json);

    if args.dry {
        let encoded = batch.encode(requested.unwrap_or_default())?;
        println!("Content-Type: {}", encoded.content_type);
        println!();
        println!("{}", encoded.body);
        return Ok(());
    }

    let config = load_config(service_root)?;
    let client = ODataClient::from_config(&config)?;
    let format = requested.unwrap_or(config.batch_format);
    let results = client
        .execute_batch_as(&batch, format)
        .await
        .context("Failed to execute batch")?;

    for result in &results {
        let status = if result.is_success() {
            result.status.to_string().bright_green()
        } else {
            result.status.to_string().bright_red()
        };
        println!(
            "{:>4}  {}  {:<6} {}",
            result.content_id,
            status,
            result.operation.http_method().to_string(),
            result.operation.url()
        );
        if !result.is_success() && !result.body.is_empty() {
            println!("      {}", result.body.dimmed());
        }
    }

    let failed = results.failures().count();
    if failed > 0 {
        anyhow::bail!("{} of {} operations failed", failed, results.len());
    }
    println!("{}", format!("All {} operations succeeded", results.len()).bright_green());
    Ok(())
}

/// Parse a batch file: a JSON array of operations and changesets
pub fn parse_batch_file(content: &str) -> Result<BatchRequest> {
    let items: Vec<BatchFileItem> = serde_json::from_str(content).context("Expected a JSON array of operations")?;

    let builder = items
        .into_iter()
        .fold(BatchRequestBuilder::new(), |builder, item| match item {
            BatchFileItem::Changeset { changeset } => builder.changeset(changeset),
            BatchFileItem::Single(operation) => builder.add(operation),
        });
    Ok(builder.build()?)
}
