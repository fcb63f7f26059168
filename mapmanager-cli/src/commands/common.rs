//! Common formatting shared across CLI commands.

use console::{style, StyledObject};
use mapmanager::storage::format_size;
use serde_json::Value;

use crate::error::CliError;

/// Print a title underlined to its width.
pub fn print_header(title: &str) {
    println!("{}", style(title).bold());
    println!("{}", "=".repeat(title.chars().count()));
}

/// Colour an availability status for terminal output.
pub fn styled_status(status: &str) -> StyledObject<&str> {
    match status {
        "present-compatible" => style("installed").green(),
        "present-incompatible" => style("outdated").yellow(),
        "absent" => style("missing").red(),
        other => style(other).dim(),
    }
}

/// Parse a JSON array produced by the manager.
pub fn json_rows(json: &str) -> Result<Vec<Value>, CliError> {
    match serde_json::from_str(json) {
        Ok(Value::Array(rows)) => Ok(rows),
        Ok(_) => Ok(Vec::new()),
        Err(e) => Err(CliError::Config(format!("unexpected manager output: {}", e))),
    }
}

/// Read a string field, or `""`.
pub fn field<'a>(row: &'a Value, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Read a size field and format it.
pub fn size_field(row: &Value, key: &str) -> String {
    format_size(row.get(key).and_then(Value::as_u64).unwrap_or(0))
}
