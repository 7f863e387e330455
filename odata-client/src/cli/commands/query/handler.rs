//! Query command handler

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::time::Instant;
use uuid::Uuid;

use super::QueryCommands;
use crate::api::ODataClient;
use crate::api::query::{Key, OrderBy, Query, QueryBuilder};
use crate::cli::commands::load_config;
use crate::cli::output::format_output;

/// Handle the query command
pub async fn handle_query_command(args: QueryCommands, service_root: Option<&str>) -> Result<()> {
    if args.no_color {
        colored::control::set_override(false);
    }

    let query = build_query(&args)?;

    if args.dry {
        match service_root {
            Some(root) => println!("{}/{}", root.trim_end_matches('/'), query.to_url()),
            None => println!("{}", query.to_url()),
        }
        return Ok(());
    }

    let config = load_config(service_root)?;
    let client = ODataClient::from_config(&config)?;
    eprintln!(
        "{} {}",
        "GET".bright_blue().bold(),
        client.resolve_url(&query.to_url()).dimmed()
    );

    let start = Instant::now();
    let result = if args.all {
        client.query_all(&query).await
    } else {
        client.execute_query(&query).await
    }
    .context("Failed to execute query")?;
    let elapsed = start.elapsed();

    let summary = format!(
        "{} records in {:.2}ms",
        result.len(),
        elapsed.as_secs_f64() * 1000.0
    );
    eprintln!("{}", summary.bright_green());
    if let Some(count) = result.count {
        eprintln!("{} {}", "Total count:".bold(), count);
    }
    if let Some(next) = &result.next_link {
        eprintln!("{} {}", "More results:".yellow(), next.dimmed());
    }

    let data = if query.key.is_some() {
        result.value.into_iter().next().unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::Array(result.value)
    };
    let formatted_output = format_output(&data, args.format)?;

    if let Some(output_path) = args.output {
        fs::write(&output_path, &formatted_output)
            .with_context(|| format!("Failed to write output to: {}", output_path.display()))?;
        eprintln!(
            "Results saved to: {}",
            output_path.display().to_string().bright_green()
        );
    } else {
        println!("{}", formatted_output);
    }

    Ok(())
}

/// Translate command-line arguments into a query
pub fn build_query(args: &QueryCommands) -> Result<Query> {
    let mut builder = QueryBuilder::new(&args.entity_set);

    if let Some(filter) = &args.filter {
        builder = builder.filter_str(filter);
    }
    for field in &args.select {
        let field = field.trim();
        if field.contains('/') {
            builder = builder.select_path(field);
        } else if !field.is_empty() {
            builder = builder.select(&[field]);
        }
    }
    let expand: Vec<&str> = args.expand.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if !expand.is_empty() {
        builder = builder.expand(&expand);
    }
    for clause in &args.orderby {
        let order = OrderBy::parse(clause)
            .with_context(|| format!("Invalid orderby clause: '{}'", clause))?;
        builder = builder.orderby(order);
    }
    if let Some(top) = args.top {
        builder = builder.top(top);
    }
    if let Some(skip) = args.skip {
        builder = builder.skip(skip);
    }
    if let Some(search) = &args.search {
        builder = builder.search(search);
    }
    if let Some(key) = &args.key {
        builder = builder.key(parse_key(key));
    }

    builder
        .count(args.count)
        .build()
        .context("Failed to build query")
}

/// Integers and GUIDs are unquoted keys; anything else is a string key
pub fn parse_key(raw: &str) -> Key {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Key::Int(n);
    }
    if let Ok(guid) = Uuid::parse_str(raw) {
        return Key::Guid(guid);
    }
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);
    Key::String(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(entity_set: &str) -> QueryCommands {
        QueryCommands {
            entity_set: entity_set.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_query_from_args() {
        let mut a = args("People");
        a.filter = Some("x => x.Age >= 18".to_string());
        a.select = vec!["FirstName".to_string(), " LastName".to_string()];
        a.orderby = vec!["LastName desc".to_string()];
        a.top = Some(10);
        a.count = true;

        let query = build_query(&a).unwrap();
        assert_eq!(
            query.to_query_params(),
            vec![
                ("$filter".to_string(), "Age ge 18".to_string()),
                ("$select".to_string(), "FirstName,LastName".to_string()),
                ("$orderby".to_string(), "LastName desc".to_string()),
                ("$top".to_string(), "10".to_string()),
                ("$count".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_query_with_key() {
        let mut a = args("People");
        a.key = Some("'russellwhyte'".to_string());
        let query = build_query(&a).unwrap();
        assert_eq!(query.to_url(), "People('russellwhyte')");
    }

    #[test]
    fn test_invalid_filter_reports_error() {
        let mut a = args("People");
        a.filter = Some("x => x.Age >=".to_string());
        assert!(build_query(&a).is_err());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("42"), Key::Int(42));
        assert_eq!(parse_key("abc"), Key::String("abc".to_string()));
        assert!(matches!(
            parse_key("6f9619ff-8b86-d011-b42d-00c04fc964ff"),
            Key::Guid(_)
        ));
    }
}
