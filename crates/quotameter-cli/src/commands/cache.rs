//! Cache commands
//!
//! Inspect or wipe the durable snapshot cache.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use quotameter_core::quota::{CacheEntry, ProviderId};

use super::Context;
use crate::output::{format_percent, print_output, print_success};

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cached snapshots
    Show,

    /// Delete every cached snapshot and recorded window
    Reset,
}

/// Cache row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct CacheRow {
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Resets at")]
    pub resets_at: String,
    #[tabled(rename = "Observed at")]
    pub observed_at: String,
    #[tabled(rename = "Stale")]
    pub stale: bool,
}

impl CacheRow {
    fn new(provider: &ProviderId, entry: &CacheEntry) -> Self {
        let snapshot = &entry.last_good;
        Self {
            provider: provider.to_string(),
            used: format_percent(Some(snapshot.used_percent)),
            resets_at: snapshot
                .resets_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            observed_at: snapshot.observed_at.to_rfc3339(),
            stale: entry.is_stale,
        }
    }
}

pub async fn execute(ctx: &Context, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Show => show_cache(ctx).await,
        CacheAction::Reset => reset_cache(ctx).await,
    }
}

async fn show_cache(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = ctx.engine(&config).await?;

    let rows: Vec<CacheRow> = engine
        .cache_entries()
        .await
        .iter()
        .map(|(provider, entry)| CacheRow::new(provider, entry))
        .collect();

    print_output(&rows, ctx.format)
}

async fn reset_cache(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = ctx.engine(&config).await?;

    engine.reset_cache().await?;
    print_success("Cache cleared", ctx.quiet);
    Ok(())
}
