//! Config commands
//!
//! Show, locate and initialize the configuration file.

use anyhow::{Context as _, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use quotameter_core::config::{SourceConfig, StorageKind, CONFIG_ENV};
use quotameter_core::EngineConfig;

use super::Context;
use crate::output::{print_error, print_info, print_json, print_output, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl ConfigRow {
    fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
        ConfigAction::Path => show_path(ctx),
        ConfigAction::Init { force } => init_config(ctx, force),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    match ctx.format {
        OutputFormat::Json => print_json(&config),
        OutputFormat::Table => print_output(&config_rows(ctx, &config), ctx.format),
    }
}

fn show_path(ctx: &Context) -> Result<()> {
    println!("{}", ctx.config_path.display());
    if !ctx.config_path.exists() {
        print_info("(file does not exist; defaults are in effect)", ctx.quiet);
    }
    Ok(())
}

fn init_config(ctx: &Context, force: bool) -> Result<()> {
    if ctx.config_path.exists() && !force {
        print_error(&format!(
            "Config already exists at {} (use --force to overwrite)",
            ctx.config_path.display()
        ));
        anyhow::bail!("config file already exists");
    }

    EngineConfig::default()
        .save_to(&ctx.config_path)
        .with_context(|| format!("Failed to write {}", ctx.config_path.display()))?;

    print_success(
        &format!("Wrote default config to {}", ctx.config_path.display()),
        ctx.quiet,
    );
    Ok(())
}

fn config_rows(ctx: &Context, config: &EngineConfig) -> Vec<ConfigRow> {
    let source = if std::env::var(CONFIG_ENV).is_ok() {
        "env"
    } else {
        "default"
    };

    let mut rows = vec![
        ConfigRow::new(
            "config_path",
            format!("{} ({})", ctx.config_path.display(), source),
        ),
        ConfigRow::new("storage", storage_name(config.storage)),
        ConfigRow::new("cache_path", config.resolve_cache_path().display()),
        ConfigRow::new("stale_after_secs", config.stale_after_secs),
        ConfigRow::new("request_timeout_secs", config.request_timeout_secs),
        ConfigRow::new("initial_delay_secs", config.initial_delay_secs),
        ConfigRow::new("stagger_secs", config.stagger_secs),
        ConfigRow::new("jitter_ms", config.jitter_ms),
        ConfigRow::new("window_history_len", config.window_history_len),
    ];

    for provider in &config.providers {
        let prefix = format!("providers.{}", provider.id);
        let zones = &provider.thresholds.usage_zones;
        rows.push(ConfigRow::new(format!("{}.name", prefix), provider.label()));
        rows.push(ConfigRow::new(format!("{}.enabled", prefix), provider.enabled));
        rows.push(ConfigRow::new(
            format!("{}.poll_interval_secs", prefix),
            provider.poll_interval_secs,
        ));
        rows.push(ConfigRow::new(format!("{}.window_hours", prefix), provider.window_hours));
        rows.push(ConfigRow::new(
            format!("{}.secondary_window_hours", prefix),
            provider
                .secondary_window_hours
                .map(|h| h.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ));
        rows.push(ConfigRow::new(format!("{}.source", prefix), source_text(&provider.source)));
        rows.push(ConfigRow::new(
            format!("{}.usage_zones", prefix),
            format!(
                "{}/{}/{}/{}",
                zones.green(),
                zones.yellow(),
                zones.orange(),
                zones.red()
            ),
        ));
    }

    rows
}

fn storage_name(kind: StorageKind) -> &'static str {
    match kind {
        StorageKind::Sqlite => "sqlite",
        StorageKind::Json => "json",
        StorageKind::Memory => "memory",
    }
}

fn source_text(source: &SourceConfig) -> String {
    match source {
        SourceConfig::ClaudeOauth {
            credentials_path,
            token_env,
        } => {
            let mut text = "claude_oauth".to_string();
            if let Some(path) = credentials_path {
                text.push_str(&format!(" ({})", path));
            }
            if let Some(var) = token_env {
                text.push_str(&format!(" token from ${}", var));
            }
            text
        }
        SourceConfig::JsonFile { path } => format!("json_file ({})", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_text() {
        assert_eq!(
            source_text(&SourceConfig::JsonFile {
                path: "~/usage.json".into()
            }),
            "json_file (~/usage.json)"
        );
        assert_eq!(
            source_text(&SourceConfig::ClaudeOauth {
                credentials_path: None,
                token_env: Some("CLAUDE_TOKEN".into()),
            }),
            "claude_oauth token from $CLAUDE_TOKEN"
        );
    }

    #[test]
    fn test_default_config_rows() {
        let ctx = Context {
            config_path: "/tmp/quotameter/config.json".into(),
            format: OutputFormat::Table,
            quiet: true,
        };
        let rows = config_rows(&ctx, &EngineConfig::default());
        assert!(rows.iter().any(|r| r.key == "providers.claude.enabled" && r.value == "true"));
        assert!(rows.iter().any(|r| r.key == "providers.claude.usage_zones" && r.value == "70/85/95/100"));
    }
}
