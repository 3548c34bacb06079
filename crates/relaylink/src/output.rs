use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One JSON document per line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Two-column key/value table.
pub fn print_fields(fields: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (name, value) in fields {
        table.add_row(vec![name.to_string(), value.clone()]);
    }
    println!("{table}");
}

/// Aligned `name: value` lines.
pub fn print_pretty(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in fields {
        println!("{:width$}  {value}", format!("{name}:"), width = width + 1);
    }
}

/// Render a payload for a table cell or pretty line.
pub fn payload_preview(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preview_unquotes_strings() {
        assert_eq!(payload_preview(&json!("hi")), "hi");
        assert_eq!(payload_preview(&json!({ "a": 1 })), "{\"a\":1}");
    }
}
