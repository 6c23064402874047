//! Durable cache storage
//!
//! Key-value persistence for last known-good snapshots, keyed by provider,
//! plus the log of completed windows. Read once at startup, written after
//! every successful poll.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::history::CompletedWindow;
use super::types::{ProviderId, Snapshot};
use crate::error::{Error, Result};

/// Completed windows kept per provider by the bundled backends
pub const MAX_STORED_WINDOWS: usize = 50;

/// Persistence backend for the snapshot cache
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Load every persisted snapshot
    ///
    /// A store that exists but cannot be understood returns
    /// [`Error::CorruptCache`]; the cache then starts empty.
    async fn load_all(&self) -> Result<Vec<(ProviderId, Snapshot)>>;

    /// Persist the snapshot for one provider, replacing any previous one
    async fn save(&self, provider: &ProviderId, snapshot: &Snapshot) -> Result<()>;

    /// Remove everything, history included (explicit operator reset only)
    async fn clear(&self) -> Result<()>;

    /// Record a completed window
    async fn save_window(&self, provider: &ProviderId, window: &CompletedWindow) -> Result<()> {
        let _ = (provider, window);
        Ok(())
    }

    /// Load recorded windows, in no particular order
    async fn load_windows(&self) -> Result<Vec<(ProviderId, CompletedWindow)>> {
        Ok(Vec::new())
    }
}

/// Insert keeping newest-first order, one entry per reset time
fn insert_window(windows: &mut Vec<CompletedWindow>, window: &CompletedWindow) {
    windows.retain(|w| w.resets_at != window.resets_at);
    windows.push(window.clone());
    windows.sort_by(|a, b| b.resets_at.cmp(&a.resets_at));
    windows.truncate(MAX_STORED_WINDOWS);
}

fn flatten_windows<'a, I>(windows: I) -> Vec<(ProviderId, CompletedWindow)>
where
    I: IntoIterator<Item = (&'a ProviderId, &'a Vec<CompletedWindow>)>,
{
    windows
        .into_iter()
        .flat_map(|(p, ws)| ws.iter().map(move |w| (p.clone(), w.clone())))
        .collect()
}

// ============================================================================
// Memory
// ============================================================================

/// Non-durable storage for tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<HashMap<ProviderId, Snapshot>>,
    windows: Mutex<HashMap<ProviderId, Vec<CompletedWindow>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with snapshots, as if they had been persisted earlier
    pub fn with_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (ProviderId, Snapshot)>,
    {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn get(&self, provider: &ProviderId) -> Option<Snapshot> {
        self.rows.lock().await.get(provider).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn load_all(&self) -> Result<Vec<(ProviderId, Snapshot)>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn save(&self, provider: &ProviderId, snapshot: &Snapshot) -> Result<()> {
        self.rows
            .lock()
            .await
            .insert(provider.clone(), snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.rows.lock().await.clear();
        self.windows.lock().await.clear();
        Ok(())
    }

    async fn save_window(&self, provider: &ProviderId, window: &CompletedWindow) -> Result<()> {
        let mut windows = self.windows.lock().await;
        insert_window(windows.entry(provider.clone()).or_default(), window);
        Ok(())
    }

    async fn load_windows(&self) -> Result<Vec<(ProviderId, CompletedWindow)>> {
        Ok(flatten_windows(self.windows.lock().await.iter()))
    }
}

// ============================================================================
// JSON File
// ============================================================================

const CACHE_FILE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    providers: BTreeMap<ProviderId, Snapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    history: BTreeMap<ProviderId, Vec<CompletedWindow>>,
}

/// Single JSON document on disk, rewritten atomically on every save
pub struct JsonFileStorage {
    path: PathBuf,
    doc: Mutex<CacheFile>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: Mutex::new(CacheFile {
                version: CACHE_FILE_VERSION,
                ..Default::default()
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<CacheFile>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[quota:store] No cache file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let doc: CacheFile = serde_json::from_str(&content)
            .map_err(|e| Error::corrupt_cache(format!("{}: {}", self.path.display(), e)))?;

        if doc.version != CACHE_FILE_VERSION {
            return Err(Error::corrupt_cache(format!(
                "{}: unsupported cache version {}",
                self.path.display(),
                doc.version
            )));
        }
        Ok(Some(doc))
    }

    async fn write_file(&self, doc: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(doc)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for JsonFileStorage {
    async fn load_all(&self) -> Result<Vec<(ProviderId, Snapshot)>> {
        let mut doc = self.doc.lock().await;
        if let Some(loaded) = self.read_file().await? {
            *doc = loaded;
        }
        Ok(doc
            .providers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn save(&self, provider: &ProviderId, snapshot: &Snapshot) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.providers.insert(provider.clone(), snapshot.clone());
        self.write_file(&doc).await
    }

    async fn clear(&self) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.providers.clear();
        doc.history.clear();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_window(&self, provider: &ProviderId, window: &CompletedWindow) -> Result<()> {
        let mut doc = self.doc.lock().await;
        insert_window(doc.history.entry(provider.clone()).or_default(), window);
        self.write_file(&doc).await
    }

    async fn load_windows(&self) -> Result<Vec<(ProviderId, CompletedWindow)>> {
        let mut doc = self.doc.lock().await;
        if let Some(loaded) = self.read_file().await? {
            *doc = loaded;
        }
        Ok(flatten_windows(doc.history.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_storage_roundtrip_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let snapshot = Snapshot::new(42.0, None, Utc::now());

        let first = JsonFileStorage::new(&path);
        first.load_all().await.unwrap();
        first.save(&"claude".into(), &snapshot).await.unwrap();

        let second = JsonFileStorage::new(&path);
        let rows = second.load_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, ProviderId::new("claude"));
        assert_eq!(rows[0].1, snapshot);
    }

    #[tokio::test]
    async fn test_json_storage_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("absent.json"));
        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_storage_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        let err = storage.load_all().await.unwrap_err();
        assert!(matches!(err, Error::CorruptCache(_)));
    }

    #[tokio::test]
    async fn test_json_storage_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let storage = JsonFileStorage::new(&path);
        storage
            .save(&"claude".into(), &Snapshot::new(1.0, None, Utc::now()))
            .await
            .unwrap();
        assert!(path.exists());

        storage.clear().await.unwrap();
        assert!(!path.exists());
        storage.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_json_storage_keeps_history_with_snapshots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let now = Utc::now();
        let window = CompletedWindow {
            resets_at: now,
            final_used_percent: 77.0,
            observed_at: now - chrono::Duration::minutes(4),
        };

        let first = JsonFileStorage::new(&path);
        first.save_window(&"claude".into(), &window).await.unwrap();
        first
            .save(&"claude".into(), &Snapshot::new(3.0, None, now))
            .await
            .unwrap();

        let second = JsonFileStorage::new(&path);
        assert_eq!(second.load_all().await.unwrap().len(), 1);
        let windows = second.load_windows().await.unwrap();
        assert_eq!(windows, vec![(ProviderId::new("claude"), window)]);
    }

    #[tokio::test]
    async fn test_json_storage_wrong_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{ "version": 99, "providers": {} }"#).unwrap();

        let err = JsonFileStorage::new(&path).load_all().await.unwrap_err();
        assert!(matches!(err, Error::CorruptCache(_)));
    }

    #[tokio::test]
    async fn test_memory_storage_windows_bounded() {
        let storage = MemoryStorage::new();
        let base = Utc::now();
        for i in 0..(MAX_STORED_WINDOWS as i64 + 5) {
            let window = CompletedWindow {
                resets_at: base + chrono::Duration::hours(5 * i),
                final_used_percent: 10.0,
                observed_at: base,
            };
            storage.save_window(&"claude".into(), &window).await.unwrap();
        }
        assert_eq!(storage.load_windows().await.unwrap().len(), MAX_STORED_WINDOWS);

        storage.clear().await.unwrap();
        assert!(storage.load_windows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage
            .save(&"codex".into(), &Snapshot::new(3.0, None, Utc::now()))
            .await
            .unwrap();
        assert_eq!(storage.len().await, 1);
        storage.clear().await.unwrap();
        assert_eq!(storage.len().await, 0);
    }
}
