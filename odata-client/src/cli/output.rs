//! Result formatting for the CLI

use anyhow::{Context, Result};
use serde_json::Value;

use super::OutputFormat;

/// Format query results according to the specified output format
pub fn format_output(data: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(data).context("Failed to format JSON output"),
        OutputFormat::JsonCompact => serde_json::to_string(data).context("Failed to format JSON output"),
        OutputFormat::Csv => json_to_csv(data),
    }
}

/// Rows are objects; columns are the union of their keys in first-seen order
fn json_to_csv(data: &Value) -> Result<String> {
    let rows: Vec<&serde_json::Map<String, Value>> = match data {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(obj) => vec![obj],
        _ => Vec::new(),
    };

    let mut columns: Vec<&str> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !key.starts_with("@odata.") && !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns).context("Failed to write CSV header")?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| row.get(*c).map(json_value_to_string).unwrap_or_default())
            .collect();
        writer.write_record(&record).context("Failed to write CSV row")?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV output")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Convert a JSON value to a string representation
fn json_value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
