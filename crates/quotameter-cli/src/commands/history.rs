//! History command
//!
//! Lists completed windows recorded when a provider's quota reset.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use quotameter_core::quota::{classify_usage, CompletedWindow, ProviderId, SeverityZone};
use quotameter_core::SettingsStore;

use super::Context;
use crate::output::{format_percent, paint_zone, print_json, print_output, OutputFormat};

/// Completed windows of one provider, for JSON output
#[derive(Debug, Serialize)]
struct ProviderHistory {
    provider: ProviderId,
    windows: Vec<CompletedWindow>,
}

/// History row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct HistoryRow {
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Window ended")]
    pub resets_at: String,
    #[tabled(rename = "Final usage")]
    pub final_used: String,
    #[tabled(rename = "Last reading")]
    pub observed_at: String,
}

impl HistoryRow {
    fn new(provider: &ProviderId, window: &CompletedWindow, zone: SeverityZone) -> Self {
        Self {
            provider: provider.to_string(),
            resets_at: window.resets_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            final_used: paint_zone(&format_percent(Some(window.final_used_percent)), Some(zone))
                .to_string(),
            observed_at: window.observed_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

pub async fn execute(ctx: &Context, provider: Option<String>) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = ctx.engine(&config).await?;

    let groups = match provider {
        Some(id) => {
            let id: ProviderId = id.parse().map_err(anyhow::Error::msg)?;
            let windows = engine.history(&id).await;
            vec![(id, windows)]
        }
        None => engine.history_all().await,
    };

    if ctx.format == OutputFormat::Json {
        let groups: Vec<ProviderHistory> = groups
            .into_iter()
            .map(|(provider, windows)| ProviderHistory { provider, windows })
            .collect();
        return print_json(&groups);
    }

    let mut rows = Vec::new();
    for (id, windows) in &groups {
        let thresholds = engine.settings().thresholds(id);
        for window in windows {
            let zone = classify_usage(window.final_used_percent, &thresholds.usage_zones);
            rows.push(HistoryRow::new(id, window, zone));
        }
    }

    print_output(&rows, ctx.format)
}
