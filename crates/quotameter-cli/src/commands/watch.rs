//! Watch command
//!
//! Runs the poll scheduler in the foreground and prints every state change
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use quotameter_core::quota::{DisplaySnapshot, EngineEvent, PollScheduler, SchedulerOptions};

use super::status::{print_views, StatusRow};
use super::{enabled_ids, Context};
use crate::output::{format_percent, paint_zone, print_info, print_warning, OutputFormat};

pub async fn execute(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let engine = ctx.engine(&config).await?;
    let mut events = engine.subscribe();

    let scheduler = PollScheduler::new(Arc::clone(&engine), SchedulerOptions::from(&config));
    let ids = enabled_ids(&config);
    scheduler.start(&ids).await;

    if ctx.format == OutputFormat::Table {
        // Cached state until the first polls land
        print_views(&engine.display_all(Utc::now()).await, ctx.format)?;
        print_info("Watching for changes (Ctrl-C to stop)...", ctx.quiet);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event, ctx)?,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Display fell behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                log::info!("Received Ctrl-C, stopping");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn print_event(event: &EngineEvent, ctx: &Context) -> Result<()> {
    if ctx.format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        EngineEvent::StateChanged(view) => println!("{}", state_line(view)),
        EngineEvent::ThresholdCrossed(crossing) => print_warning(
            &format!(
                "{} crossed into {} ({:.1}% used)",
                crossing.provider, crossing.to, crossing.used_percent
            ),
            ctx.quiet,
        ),
        EngineEvent::WindowCompleted { provider, window } => print_info(
            &format!(
                "{} window ended at {:.1}% used",
                provider, window.final_used_percent
            ),
            ctx.quiet,
        ),
    }
    Ok(())
}

fn state_line(view: &DisplaySnapshot) -> String {
    let row = StatusRow::from(view);
    format!(
        "[{}] {:<10} {:<18} used {} ({} left), resets in {}",
        Utc::now().format("%H:%M:%S").to_string().dimmed(),
        row.provider,
        row.state,
        paint_zone(&format_percent(view.used_percent), view.severity_zone),
        row.remaining,
        row.resets_in
    )
}
