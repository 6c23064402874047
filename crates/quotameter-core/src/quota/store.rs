//! SQLite cache storage
//!
//! Persists last known-good snapshots (one row per provider) and completed
//! windows to SQLite.

use chrono::{DateTime, NaiveDateTime, Utc};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::history::CompletedWindow;
use super::storage::{CacheStorage, MAX_STORED_WINDOWS};
use super::types::{ProviderId, Snapshot, WindowReading};
use crate::db::Database;
use crate::error::Result;

// ============================================================================
// Database Row Types
// ============================================================================

/// Row of the `quota_cache` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredSnapshot {
    pub provider_id: String,
    /// Percentage of quota used (0.0 - 100.0)
    pub used_percent: f64,
    /// When the primary window resets (RFC 3339)
    pub resets_at: Option<String>,
    /// When the reading was taken (RFC 3339)
    pub observed_at: String,
    pub secondary_used_percent: Option<f64>,
    pub secondary_resets_at: Option<String>,
}

impl StoredSnapshot {
    /// Convert a row into a snapshot
    ///
    /// Returns `None` if required fields cannot be parsed.
    pub fn to_snapshot(&self) -> Option<(ProviderId, Snapshot)> {
        let provider = self.provider_id.parse::<ProviderId>().ok()?;
        let observed_at = parse_datetime(&self.observed_at)?;
        let resets_at = self.resets_at.as_deref().and_then(parse_datetime);

        let mut snapshot = Snapshot::new(self.used_percent, resets_at, observed_at);
        if let Some(used) = self.secondary_used_percent {
            let reset = self.secondary_resets_at.as_deref().and_then(parse_datetime);
            snapshot = snapshot.with_secondary(WindowReading::new(used, reset));
        }

        Some((provider, snapshot))
    }
}

/// Row of the `quota_window_history` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredWindow {
    pub provider_id: String,
    pub resets_at: String,
    pub final_used_percent: f64,
    pub observed_at: String,
}

impl StoredWindow {
    pub fn to_window(&self) -> Option<(ProviderId, CompletedWindow)> {
        let provider = self.provider_id.parse::<ProviderId>().ok()?;
        Some((
            provider,
            CompletedWindow {
                resets_at: parse_datetime(&self.resets_at)?,
                final_used_percent: self.final_used_percent,
                observed_at: parse_datetime(&self.observed_at)?,
            },
        ))
    }
}

/// Parse datetime string (supports both RFC3339 and NaiveDateTime formats)
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-02-04T10:30:00Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // SQLite's datetime('now') format
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }

    log::warn!("[quota:store] Failed to parse datetime: {}", s);
    None
}

// ============================================================================
// SqliteCacheStorage
// ============================================================================

/// Cache storage backed by SQLite
pub struct SqliteCacheStorage {
    pool: SqlitePool,
}

impl SqliteCacheStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool.clone())
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn load_all(&self) -> Result<Vec<(ProviderId, Snapshot)>> {
        let rows = sqlx::query_as::<_, StoredSnapshot>(
            r#"
            SELECT provider_id, used_percent, resets_at, observed_at,
                   secondary_used_percent, secondary_resets_at
            FROM quota_cache
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let total = rows.len();
        let snapshots: Vec<(ProviderId, Snapshot)> =
            rows.iter().filter_map(StoredSnapshot::to_snapshot).collect();

        if snapshots.len() < total {
            log::warn!(
                "[quota:store] Skipped {} unreadable cache rows",
                total - snapshots.len()
            );
        }
        log::debug!("[quota:store] Loaded {} cached snapshots", snapshots.len());

        Ok(snapshots)
    }

    async fn save(&self, provider: &ProviderId, snapshot: &Snapshot) -> Result<()> {
        let (secondary_used, secondary_reset) = snapshot
            .secondary
            .map(|w| (Some(w.used_percent), w.resets_at.map(|dt| dt.to_rfc3339())))
            .unwrap_or((None, None));

        sqlx::query(
            r#"
            INSERT INTO quota_cache
            (provider_id, used_percent, resets_at, observed_at,
             secondary_used_percent, secondary_resets_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                used_percent = excluded.used_percent,
                resets_at = excluded.resets_at,
                observed_at = excluded.observed_at,
                secondary_used_percent = excluded.secondary_used_percent,
                secondary_resets_at = excluded.secondary_resets_at
            "#,
        )
        .bind(provider.as_str())
        .bind(snapshot.used_percent)
        .bind(snapshot.resets_at.map(|dt| dt.to_rfc3339()))
        .bind(snapshot.observed_at.to_rfc3339())
        .bind(secondary_used)
        .bind(secondary_reset)
        .execute(&self.pool)
        .await?;

        log::debug!(
            "[quota:store] Saved snapshot for {} ({:.1}% used)",
            provider,
            snapshot.used_percent
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let cache = sqlx::query("DELETE FROM quota_cache")
            .execute(&self.pool)
            .await?;
        let history = sqlx::query("DELETE FROM quota_window_history")
            .execute(&self.pool)
            .await?;

        log::info!(
            "[quota:store] Cleared {} cached snapshots and {} history rows",
            cache.rows_affected(),
            history.rows_affected()
        );
        Ok(())
    }

    async fn save_window(&self, provider: &ProviderId, window: &CompletedWindow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO quota_window_history
            (provider_id, resets_at, final_used_percent, observed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(provider.as_str())
        .bind(window.resets_at.to_rfc3339())
        .bind(window.final_used_percent)
        .bind(window.observed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        // RFC 3339 strings in UTC sort chronologically
        sqlx::query(
            r#"
            DELETE FROM quota_window_history
            WHERE provider_id = ?
              AND resets_at NOT IN (
                  SELECT resets_at FROM quota_window_history
                  WHERE provider_id = ?
                  ORDER BY resets_at DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(provider.as_str())
        .bind(provider.as_str())
        .bind(MAX_STORED_WINDOWS as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_windows(&self) -> Result<Vec<(ProviderId, CompletedWindow)>> {
        let rows = sqlx::query_as::<_, StoredWindow>(
            r#"
            SELECT provider_id, resets_at, final_used_percent, observed_at
            FROM quota_window_history
            ORDER BY provider_id, resets_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(StoredWindow::to_window).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
