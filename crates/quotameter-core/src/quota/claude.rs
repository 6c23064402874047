//! Claude Code usage source
//!
//! Implements [`UsageSource`] for Claude Code, using OAuth to access
//! Anthropic's usage API.
//!
//! # Overview
//!
//! The OAuth access token is read with the following priority:
//!
//! 1. **Manual token** - configured in settings (usually via an env var)
//! 2. **File**: `~/.claude/.credentials.json`
//!
//! Anthropic's OAuth does not support automatic token refresh. Once the
//! token's `expiresAt` has passed, fetches fail with
//! [`QuotaError::TokenExpired`] until the user re-authenticates with
//! `claude /login`. The credential signal still reports the token as present,
//! so the last cached reading keeps being shown.
//!
//! # Quota Windows
//!
//! - **5-hour**: rolling rate limit window, reported as the primary reading
//! - **7-day**: weekly usage across all models, reported as the secondary reading
//!
//! # Example
//!
//! ```ignore
//! use quotameter_core::quota::{ClaudeUsageSource, UsageSource};
//!
//! let source = ClaudeUsageSource::new();
//! let reading = source.fetch_usage().await?;
//! println!("{:?}% used", reading.used_percent);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::provider::{CredentialSignal, QuotaError, UsageSource};
use super::types::{ProviderId, UsageReading, WindowReading};

// ============================================================================
// Constants
// ============================================================================

/// Anthropic OAuth usage API endpoint
const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

/// OAuth beta header value for API access
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

/// HTTP client timeout; the engine applies its own tighter bound per poll
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default provider id
pub const CLAUDE_PROVIDER_ID: &str = "claude";

// ============================================================================
// Credentials Types
// ============================================================================

/// Claude credentials file structure (~/.claude/.credentials.json)
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: Option<ClaudeOAuthCredentials>,
}

/// OAuth credentials stored within the claudeAiOauth object
#[derive(Debug, Deserialize)]
struct ClaudeOAuthCredentials {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,

    /// Expiration time in milliseconds since epoch
    #[serde(rename = "expiresAt")]
    expires_at: Option<i64>,
}

/// Token plus what we know about its lifetime
#[derive(Debug, Clone, PartialEq)]
struct OAuthToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Response from Anthropic's OAuth usage API
#[derive(Debug, Deserialize)]
struct OAuthUsageResponse {
    /// 5-hour rolling window usage
    five_hour: Option<UsageWindow>,

    /// 7-day rolling window usage (all models)
    seven_day: Option<UsageWindow>,
}

/// A single usage window from the API
#[derive(Debug, Deserialize)]
struct UsageWindow {
    /// Utilization as a percentage (28.0 for 28%)
    utilization: Option<f64>,

    /// When this window resets (ISO8601 format)
    resets_at: Option<String>,
}

// ============================================================================
// ClaudeUsageSource
// ============================================================================

/// Usage source for Claude Code
pub struct ClaudeUsageSource {
    id: ProviderId,

    /// Path to credentials file (fallback)
    credentials_path: PathBuf,

    client: Client,

    /// Manual OAuth token (highest priority)
    manual_token: Option<String>,
}

impl ClaudeUsageSource {
    /// Create a source with automatic credential discovery
    pub fn new() -> Self {
        Self::with_credentials_path(Self::default_credentials_path())
    }

    /// Create a source reading a custom credentials file
    pub fn with_credentials_path(credentials_path: PathBuf) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            id: ProviderId::new(CLAUDE_PROVIDER_ID),
            credentials_path,
            client,
            manual_token: None,
        }
    }

    /// Report under a different provider id (e.g. a second account)
    pub fn with_provider_id(mut self, id: ProviderId) -> Self {
        self.id = id;
        self
    }

    /// Set a manual OAuth token (highest priority)
    pub fn with_manual_token(mut self, token: Option<String>) -> Self {
        self.manual_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn credentials_path(&self) -> &PathBuf {
        &self.credentials_path
    }

    fn default_credentials_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join(".credentials.json")
    }

    /// Load the OAuth token (manual token first, then the credentials file)
    fn load_oauth_token(&self) -> Result<OAuthToken, QuotaError> {
        if let Some(ref token) = self.manual_token {
            log::debug!("[quota:claude] Using manually configured OAuth token");
            return Ok(OAuthToken {
                access_token: token.clone(),
                expires_at: None,
            });
        }

        self.load_from_file()
    }

    fn load_from_file(&self) -> Result<OAuthToken, QuotaError> {
        log::debug!(
            "[quota:claude] Loading OAuth token from file: {:?}",
            self.credentials_path
        );

        if !self.credentials_path.exists() {
            return Err(QuotaError::NotInstalled(
                "Claude credentials file not found. Please log in to Claude Code.".to_string(),
            ));
        }

        let content = std::fs::read_to_string(&self.credentials_path)?;
        Self::parse_credentials(&content)
    }

    fn parse_credentials(content: &str) -> Result<OAuthToken, QuotaError> {
        let credentials_file: CredentialsFile = serde_json::from_str(content).map_err(|e| {
            log::error!("[quota:claude] Failed to parse credentials: {}", e);
            QuotaError::ParseError(format!("Invalid credentials file format: {}", e))
        })?;

        let oauth = credentials_file.claude_ai_oauth.ok_or_else(|| {
            QuotaError::NotInstalled(
                "No OAuth credentials found. Please log in to Claude Code.".to_string(),
            )
        })?;

        let access_token = oauth
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                QuotaError::NotInstalled(
                    "No access token found. Please log in to Claude Code.".to_string(),
                )
            })?;

        Ok(OAuthToken {
            access_token,
            expires_at: oauth
                .expires_at
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    /// Call the Anthropic usage API
    async fn call_usage_api(&self, token: &str) -> Result<OAuthUsageResponse, QuotaError> {
        log::info!("[quota:claude] Fetching usage from Anthropic API");

        let response = self
            .client
            .get(USAGE_API_URL)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .header("User-Agent", "quotameter")
            .send()
            .await?;

        let status = response.status();
        log::debug!("[quota:claude] API response status: {}", status);

        if status == 401 || status == 403 {
            log::warn!("[quota:claude] Authentication failed: HTTP {}", status);
            return Err(QuotaError::Unauthorized(format!(
                "API authentication failed (HTTP {}). Re-login with 'claude /login'.",
                status
            )));
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            log::error!("[quota:claude] API error: HTTP {} - {}", status, error_body);
            return Err(QuotaError::ApiError(format!(
                "API returned HTTP {}: {}",
                status, error_body
            )));
        }

        let response_text = response.text().await?;
        log::debug!(
            "[quota:claude] API response body: {}",
            response_text.chars().take(200).collect::<String>()
        );

        Self::parse_usage_response(&response_text)
    }

    fn parse_usage_response(body: &str) -> Result<OAuthUsageResponse, QuotaError> {
        serde_json::from_str(body).map_err(|e| {
            log::error!("[quota:claude] Failed to parse API response: {}", e);
            QuotaError::ParseError(format!("Invalid API response: {}", e))
        })
    }

    /// Convert an API response into a reading
    ///
    /// A missing 5-hour utilization leaves `used_percent` empty rather than 0.
    fn response_to_reading(response: OAuthUsageResponse) -> UsageReading {
        let (used_percent, resets_at) = match response.five_hour {
            Some(window) => (window.utilization, parse_reset(window.resets_at.as_deref())),
            None => (None, None),
        };

        let secondary = response.seven_day.and_then(|window| {
            let used = window.utilization?;
            Some(WindowReading::new(
                used,
                parse_reset(window.resets_at.as_deref()),
            ))
        });

        UsageReading {
            used_percent,
            resets_at,
            secondary,
        }
    }
}

fn parse_reset(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            log::warn!("[quota:claude] Failed to parse resets_at: {}", raw);
            None
        }
    }
}

impl Default for ClaudeUsageSource {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl UsageSource for ClaudeUsageSource {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn fetch_usage(&self) -> Result<UsageReading, QuotaError> {
        let token = self.load_oauth_token()?;
        if token.is_expired(Utc::now()) {
            return Err(QuotaError::TokenExpired);
        }

        let response = self.call_usage_api(&token.access_token).await?;
        let reading = Self::response_to_reading(response);

        if reading.used_percent.is_none() {
            log::warn!("[quota:claude] No 5-hour utilization in API response");
        }
        Ok(reading)
    }
}

impl CredentialSignal for ClaudeUsageSource {
    fn has_valid_token(&self, provider: &ProviderId) -> bool {
        if provider != &self.id {
            return false;
        }
        match self.load_oauth_token() {
            Ok(token) => {
                if token.is_expired(Utc::now()) {
                    log::debug!("[quota:claude] Token present but expired");
                }
                true
            }
            Err(e) => {
                log::debug!("[quota:claude] No usable token: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
