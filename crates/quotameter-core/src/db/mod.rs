//! Database module - SQLx with SQLite

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::Result;

/// Suffix given to a database file that could not be opened
const CORRUPT_SUFFIX: &str = ".corrupt";

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) a database at a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Open a database, setting aside an unreadable file and starting fresh
    ///
    /// The broken file is renamed to `<name>.corrupt` so it can be inspected.
    pub async fn open_or_recover(db_path: PathBuf) -> Result<Self> {
        let err = match Self::open(db_path.clone()).await {
            Ok(db) => return Ok(db),
            Err(e) => e,
        };

        if !db_path.exists() {
            return Err(err);
        }

        let aside = corrupt_path(&db_path);
        log::warn!(
            "Database {} is unreadable ({}), moving it to {}",
            db_path.display(),
            err,
            aside.display()
        );
        std::fs::rename(&db_path, &aside)?;
        for sidecar in ["-wal", "-shm", "-journal"] {
            let mut name = db_path.as_os_str().to_os_string();
            name.push(sidecar);
            let _ = std::fs::remove_file(PathBuf::from(name));
        }

        Self::open(db_path).await
    }

    /// Private in-memory database (single connection so every query sees the same data)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        log::debug!("Running database migrations...");

        // Last known-good snapshot per provider
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_cache (
                provider_id TEXT PRIMARY KEY,
                used_percent REAL NOT NULL,
                resets_at TEXT,
                observed_at TEXT NOT NULL,
                secondary_used_percent REAL,
                secondary_resets_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Completed windows
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_window_history (
                provider_id TEXT NOT NULL,
                resets_at TEXT NOT NULL,
                final_used_percent REAL NOT NULL,
                observed_at TEXT NOT NULL,
                PRIMARY KEY (provider_id, resets_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        log::debug!("Database migrations complete");
        Ok(())
    }
}

fn corrupt_path(db_path: &Path) -> PathBuf {
    let mut name: OsString = db_path.as_os_str().to_os_string();
    name.push(CORRUPT_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_file_and_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let db = Database::open(path.clone()).await.unwrap();
        assert!(path.exists());

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&db.pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"quota_cache"));
        assert!(names.contains(&"quota_window_history"));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        Database::open(path.clone()).await.unwrap();
        Database::open(path).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_or_recover_sets_aside_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let db = Database::open_or_recover(path.clone()).await.unwrap();
        let rows: Vec<(String,)> = sqlx::query_as("SELECT provider_id FROM quota_cache")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(dir.path().join("cache.db.corrupt").exists());
    }

    #[tokio::test]
    async fn test_open_or_recover_keeps_good_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        Database::open(path.clone()).await.unwrap();

        Database::open_or_recover(path).await.unwrap();
        assert!(!dir.path().join("cache.db.corrupt").exists());
    }

    #[test]
    fn test_corrupt_path() {
        assert_eq!(
            corrupt_path(Path::new("/tmp/q/cache.db")),
            PathBuf::from("/tmp/q/cache.db.corrupt")
        );
    }
}
