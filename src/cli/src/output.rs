//! Terminal output for the jobq CLI: status lines, key-value details, and
//! table/JSON/YAML rendering of jobs and stats.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// How structured results are rendered.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
    /// Machine-readable YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// One `key: value` line, indented under a header or status line.
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// A bold section header with surrounding blank lines.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Render a collection of rows. Tables need `Tabled`; the machine formats
/// serialize the rows as given.
pub fn print_list<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) {
    if let OutputFormat::Table = format {
        if rows.is_empty() {
            println!("{}", "No results found.".dimmed());
            return;
        }
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string();
        println!("{table}");
    } else {
        print_serialized(rows, format);
    }
}

/// Render a single value. Table format falls back to pretty JSON, since a
/// lone struct has no natural table shape.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table | OutputFormat::Json => print_serialized(item, OutputFormat::Json),
        OutputFormat::Yaml => print_serialized(item, format),
    }
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(yaml) => print!("{yaml}"),
            Err(e) => print_error(&format!("failed to render output: {e}")),
        },
        _ => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => print_error(&format!("failed to render output: {e}")),
        },
    }
}

/// Shorten a string for a table cell, appending an ellipsis when cut.
pub fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsize_leaves_short_text_alone() {
        assert_eq!(ellipsize("echo hi", 30), "echo hi");
    }

    #[test]
    fn ellipsize_cuts_long_text() {
        let long = "x".repeat(40);
        let cut = ellipsize(&long, 30);
        assert_eq!(cut.len(), 33);
        assert!(cut.ends_with("..."));
    }
}
