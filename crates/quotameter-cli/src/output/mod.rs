//! Output formatting module
//!
//! Provides table and JSON output formatting for CLI commands.

use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

use quotameter_core::quota::{SeverityZone, TimeBand};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Print rows as a table, or the raw items as JSON
pub fn print_output<T>(data: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("No items found.");
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => print_json(data)?,
    }
    Ok(())
}

/// Pretty-print any serializable value
pub fn print_json<T>(data: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

/// Print a warning (respects quiet mode)
pub fn print_warning(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.yellow());
    }
}

// ============================================================================
// Zone colouring
// ============================================================================

pub fn paint_zone(text: &str, zone: Option<SeverityZone>) -> ColoredString {
    match zone {
        Some(SeverityZone::Green) => text.green(),
        Some(SeverityZone::Yellow) => text.yellow(),
        Some(SeverityZone::Orange) => text.truecolor(255, 165, 0),
        Some(SeverityZone::Red) => text.red().bold(),
        None => text.dimmed(),
    }
}

pub fn paint_band(text: &str, band: Option<TimeBand>) -> ColoredString {
    match band {
        Some(TimeBand::Blue) => text.blue(),
        Some(TimeBand::Yellow) => text.yellow(),
        Some(TimeBand::Orange) => text.truecolor(255, 165, 0),
        Some(TimeBand::Red) => text.red(),
        None => text.dimmed(),
    }
}

/// `42.0%`, or `-` when unknown
pub fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(Some(42.0)), "42.0%");
        assert_eq!(format_percent(Some(99.96)), "100.0%");
        assert_eq!(format_percent(None), "-");
    }

    #[test]
    fn test_paint_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(paint_zone("58.0%", Some(SeverityZone::Orange)).to_string(), "58.0%");
        assert_eq!(paint_band("70.0%", None).to_string(), "70.0%");
    }
}
