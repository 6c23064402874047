//! Status command
//!
//! Polls every enabled provider once and prints what a UI would show.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tabled::Tabled;

use quotameter_core::quota::{DisplaySnapshot, DisplayState, PollScheduler, SchedulerOptions};

use super::{enabled_ids, Context};
use crate::output::{format_percent, paint_band, paint_zone, print_info, print_json, print_output, OutputFormat};

/// Status row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Remaining")]
    pub remaining: String,
    #[tabled(rename = "Elapsed")]
    pub elapsed: String,
    #[tabled(rename = "Resets in")]
    pub resets_in: String,
    #[tabled(rename = "Weekly")]
    pub weekly: String,
}

impl From<&DisplaySnapshot> for StatusRow {
    fn from(view: &DisplaySnapshot) -> Self {
        let weekly = view
            .secondary
            .as_ref()
            .map(|s| {
                let text = format!("{} ({})", format_percent(Some(s.used_percent)), s.countdown_text);
                paint_zone(&text, Some(s.severity_zone)).to_string()
            })
            .unwrap_or_else(|| "-".to_string());

        Self {
            provider: view.provider.to_string(),
            state: state_text(view),
            used: paint_zone(&format_percent(view.used_percent), view.severity_zone).to_string(),
            remaining: format_percent(view.remaining_percent),
            elapsed: paint_band(&format_percent(view.elapsed_percent), view.time_zone).to_string(),
            resets_in: view.countdown_text.clone(),
            weekly,
        }
    }
}

fn state_text(view: &DisplaySnapshot) -> String {
    match &view.display_state {
        DisplayState::StaleFallback { age_seconds, .. } => {
            format!("stale ({}m old)", age_seconds / 60)
        }
        other => other.label().replace('_', " "),
    }
}

/// Print a set of display snapshots in the requested format
pub fn print_views(views: &[DisplaySnapshot], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(views),
        OutputFormat::Table => {
            let rows: Vec<StatusRow> = views.iter().map(StatusRow::from).collect();
            print_output(&rows, format)
        }
    }
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = ctx.engine(&config).await?;

    let ids = enabled_ids(&config);
    for id in &ids {
        engine.activate(id).await;
    }

    if ctx.format == OutputFormat::Table {
        print_info(&format!("Polling {} provider(s)...", ids.len()), ctx.quiet);
    }

    let scheduler = PollScheduler::new(Arc::clone(&engine), SchedulerOptions::from(&config));
    scheduler.refresh_all().await;

    let views = engine.display_all(Utc::now()).await;
    print_views(&views, ctx.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotameter_core::quota::{
        transition, ProviderId, ThresholdConfig, UsageQueryResult, UsageReading,
    };

    #[test]
    fn test_row_from_live_view() {
        colored::control::set_override(false);
        let now = Utc::now();
        let result = UsageQueryResult::success(
            UsageReading {
                used_percent: Some(58.0),
                resets_at: Some(now + chrono::Duration::minutes(90)),
                secondary: None,
            },
            now,
        );
        let t = transition(true, None, Some(&result), now);
        let view = DisplaySnapshot::build(
            &ProviderId::new("claude"),
            &t,
            &ThresholdConfig::default(),
            chrono::Duration::hours(5),
            None,
            now,
        );

        let row = StatusRow::from(&view);
        assert_eq!(row.state, "live");
        assert_eq!(row.used, "58.0%");
        assert_eq!(row.remaining, "42.0%");
        assert_eq!(row.weekly, "-");
    }

    #[test]
    fn test_row_for_missing_credentials() {
        colored::control::set_override(false);
        let now = Utc::now();
        let t = transition(false, None, None, now);
        let view = DisplaySnapshot::build(
            &ProviderId::new("claude"),
            &t,
            &ThresholdConfig::default(),
            chrono::Duration::hours(5),
            None,
            now,
        );

        let row = StatusRow::from(&view);
        assert_eq!(row.state, "no credentials");
        assert_eq!(row.used, "-");
    }
}
