//! JSON file usage source
//!
//! Reads a usage document that another tool (a status-line hook, a shell
//! script, a browser extension) keeps up to date:
//!
//! ```json
//! {
//!   "used_percent": 42.0,
//!   "resets_at": "2026-03-01T15:00:00Z",
//!   "secondary": { "used_percent": 12.0, "resets_at": "2026-03-06T00:00:00Z" }
//! }
//! ```
//!
//! The file existing counts as having credentials.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::provider::{CredentialSignal, QuotaError, UsageSource};
use super::types::{ProviderId, UsageReading, WindowReading};

#[derive(Debug, Deserialize)]
struct UsageDocument {
    used_percent: Option<f64>,
    resets_at: Option<DateTime<Utc>>,
    secondary: Option<SecondaryWindow>,
}

#[derive(Debug, Deserialize)]
struct SecondaryWindow {
    used_percent: f64,
    resets_at: Option<DateTime<Utc>>,
}

pub struct JsonFileSource {
    id: ProviderId,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(id: ProviderId, path: impl AsRef<str>) -> Self {
        let expanded = shellexpand::tilde(path.as_ref()).into_owned();
        Self {
            id,
            path: PathBuf::from(expanded),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(content: &str) -> Result<UsageReading, QuotaError> {
        let doc: UsageDocument = serde_json::from_str(content)?;
        Ok(UsageReading {
            used_percent: doc.used_percent,
            resets_at: doc.resets_at,
            secondary: doc
                .secondary
                .map(|w| WindowReading::new(w.used_percent, w.resets_at)),
        })
    }
}

#[async_trait]
impl UsageSource for JsonFileSource {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn fetch_usage(&self) -> Result<UsageReading, QuotaError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QuotaError::NotInstalled(format!(
                    "usage file not found: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        Self::parse(&content)
    }
}

impl CredentialSignal for JsonFileSource {
    fn has_valid_token(&self, provider: &ProviderId) -> bool {
        provider == &self.id && self.path.is_file()
    }
}
