//! Usage source trait and error types
//!
//! Defines the interface that usage oracles must implement, and the
//! normalization step that turns any adapter outcome into a
//! [`UsageQueryResult`] so that no poll error escapes to the scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{FailureKind, ProviderId, UsageQueryResult, UsageReading};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when fetching usage from an oracle
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Provider is not installed or configured
    #[error("Provider not installed: {0}")]
    NotInstalled(String),

    /// Authentication failed or token is invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API returned an error
    #[error("API error: {0}")]
    ApiError(String),

    /// Failed to parse API response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// OAuth token has expired
    #[error("Token expired")]
    TokenExpired,

    /// I/O error (e.g., reading credential or usage files)
    #[error("IO error: {0}")]
    IoError(String),

    /// General/unknown error
    #[error("{0}")]
    Other(String),
}

impl QuotaError {
    /// Map this error into the engine's failure taxonomy
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            QuotaError::NotInstalled(_) => FailureKind::CredentialMissing,
            QuotaError::Unauthorized(_) | QuotaError::TokenExpired => FailureKind::AuthExpired,
            QuotaError::ParseError(_) => FailureKind::MalformedResponse,
            QuotaError::ApiError(_)
            | QuotaError::NetworkError(_)
            | QuotaError::IoError(_)
            | QuotaError::Other(_) => FailureKind::Transient,
        }
    }
}

impl From<std::io::Error> for QuotaError {
    fn from(err: std::io::Error) -> Self {
        QuotaError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuotaError::NetworkError("Request timed out".to_string())
        } else if err.is_connect() {
            QuotaError::NetworkError("Connection failed".to_string())
        } else if err.is_decode() {
            QuotaError::ParseError(err.to_string())
        } else if err.is_status() {
            match err.status() {
                Some(status) if status.as_u16() == 401 => {
                    QuotaError::Unauthorized("Invalid or expired credentials".to_string())
                }
                Some(status) if status.as_u16() == 403 => {
                    QuotaError::Unauthorized("Access forbidden".to_string())
                }
                Some(status) => QuotaError::ApiError(format!("HTTP {}", status)),
                None => QuotaError::NetworkError(err.to_string()),
            }
        } else {
            QuotaError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::ParseError(err.to_string())
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Trait for usage oracles
///
/// Implement this trait to add support for a new provider. Each source is
/// responsible for:
/// 1. Locating whatever credentials it needs
/// 2. Asking the provider's endpoint for current usage
/// 3. Parsing the answer into a [`UsageReading`]
///
/// Sources may return any error; [`query_usage`] normalizes it.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use quotameter_core::quota::{ProviderId, QuotaError, UsageReading, UsageSource};
///
/// struct MySource { id: ProviderId }
///
/// #[async_trait]
/// impl UsageSource for MySource {
///     fn provider_id(&self) -> &ProviderId {
///         &self.id
///     }
///
///     async fn fetch_usage(&self) -> Result<UsageReading, QuotaError> {
///         Ok(UsageReading { used_percent: Some(12.0), ..Default::default() })
///     }
/// }
/// ```
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Provider this source reports for
    fn provider_id(&self) -> &ProviderId;

    /// Ask the oracle for current usage
    async fn fetch_usage(&self) -> Result<UsageReading, QuotaError>;
}

/// Quick, network-free check for whether a provider has a usable token
///
/// Supplied by an external credential-detection subsystem; the engine treats
/// the answer as opaque.
pub trait CredentialSignal: Send + Sync {
    fn has_valid_token(&self, provider: &ProviderId) -> bool;
}

/// Fixed credential answers, for embedding shells that already know
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    present: HashSet<ProviderId>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every listed provider reports a valid token
    pub fn with_tokens<I, P>(providers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProviderId>,
    {
        Self {
            present: providers.into_iter().map(Into::into).collect(),
        }
    }
}

impl CredentialSignal for StaticCredentials {
    fn has_valid_token(&self, provider: &ProviderId) -> bool {
        self.present.contains(provider)
    }
}

/// Routes each provider to the signal that knows about it
///
/// Providers without a registered signal report no token.
#[derive(Default)]
pub struct CredentialRouter {
    signals: HashMap<ProviderId, Arc<dyn CredentialSignal>>,
}

impl CredentialRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: ProviderId, signal: Arc<dyn CredentialSignal>) {
        self.signals.insert(provider, signal);
    }
}

impl CredentialSignal for CredentialRouter {
    fn has_valid_token(&self, provider: &ProviderId) -> bool {
        self.signals
            .get(provider)
            .map(|signal| signal.has_valid_token(provider))
            .unwrap_or(false)
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Run one bounded poll against a source and normalize the outcome
///
/// `observed_at` should be the instant the attempt was issued. A timeout,
/// network error, malformed body or auth failure all yield `ok == false`.
pub async fn query_usage(
    source: &dyn UsageSource,
    timeout: Duration,
    observed_at: DateTime<Utc>,
) -> UsageQueryResult {
    let provider = source.provider_id().clone();

    match tokio::time::timeout(timeout, source.fetch_usage()).await {
        Ok(Ok(reading)) => {
            log::debug!(
                "[quota:provider] {} answered used_percent={:?}",
                provider,
                reading.used_percent
            );
            UsageQueryResult::success(reading, observed_at)
        }
        Ok(Err(e)) => {
            let kind = e.failure_kind();
            match kind {
                FailureKind::MalformedResponse => {
                    log::warn!("[quota:provider] {} returned malformed data: {}", provider, e)
                }
                FailureKind::AuthExpired => {
                    log::warn!("[quota:provider] {} rejected credentials: {}", provider, e)
                }
                _ => log::info!("[quota:provider] {} poll failed: {}", provider, e),
            }
            UsageQueryResult::failure(kind, e.to_string(), observed_at)
        }
        Err(_) => {
            log::warn!(
                "[quota:provider] {} poll timed out after {}s",
                provider,
                timeout.as_secs()
            );
            UsageQueryResult::failure(
                FailureKind::Timeout,
                format!("Request timed out after {}s", timeout.as_secs()),
                observed_at,
            )
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
