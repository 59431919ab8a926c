use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::database::DatabaseManager;

/// Print `message`, plus `data` merged into the JSON envelope
pub fn output_success<T: Serialize>(output_format: OutputFormat, message: &str, data: &T) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let response = json!({
                "success": true,
                "message": message,
                "data": serde_json::to_value(data)?,
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
            if let Value::Object(map) = serde_json::to_value(data)? {
                print_fields(&map);
            }
        }
    }
    Ok(())
}

pub fn output_error(output_format: OutputFormat, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "success": false, "error": message }))?);
        }
        OutputFormat::Text => eprintln!("Error: {}", message),
    }
    Ok(())
}

/// `key: value` lines, skipping nested objects and arrays
pub fn print_fields(map: &serde_json::Map<String, Value>) {
    let width = map.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in map {
        let rendered = match value {
            Value::Object(_) | Value::Array(_) => continue,
            Value::String(s) => s.clone(),
            Value::Null => "-".to_string(),
            other => other.to_string(),
        };
        println!("  {:width$}  {}", key, rendered, width = width);
    }
}

pub async fn connect() -> anyhow::Result<sqlx::PgPool> {
    DatabaseManager::pool().await.context("connecting to DATABASE_URL")
}
