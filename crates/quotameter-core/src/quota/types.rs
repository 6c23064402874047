//! Quota tracking types
//!
//! Readings, snapshots and poll outcomes shared by every layer of the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Identity
// ============================================================================

/// Opaque identifier of a trackable service (e.g. `"claude"`)
///
/// Stable across sessions; used as the key for cache rows, timers and settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Provider id cannot be empty".to_string());
        }
        Ok(ProviderId(trimmed.to_string()))
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        ProviderId(s.to_string())
    }
}

// ============================================================================
// Readings
// ============================================================================

/// Usage of a single quota window as reported by an oracle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowReading {
    /// Percentage of quota used (0.0 - 100.0)
    pub used_percent: f64,
    /// When the window resets
    pub resets_at: Option<DateTime<Utc>>,
}

impl WindowReading {
    pub fn new(used_percent: f64, resets_at: Option<DateTime<Utc>>) -> Self {
        Self {
            used_percent: clamp_percent(used_percent),
            resets_at,
        }
    }
}

/// Raw answer from a usage oracle, before normalization
///
/// `used_percent` is `None` when the oracle answered but had no utilization
/// figure for the primary window. That is not the same as zero usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageReading {
    pub used_percent: Option<f64>,
    pub resets_at: Option<DateTime<Utc>>,
    /// Independent longer window (e.g. 7-day), if the oracle reports one
    pub secondary: Option<WindowReading>,
}

// ============================================================================
// Poll Outcome
// ============================================================================

/// Classified reason a poll produced no authoritative reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No credentials available; a legitimate disabled state
    CredentialMissing,
    /// Network error, 5xx, or similar; retried on the next scheduled tick
    Transient,
    /// Request exceeded the bounded timeout
    Timeout,
    /// 401/403 or a token past its expiry
    AuthExpired,
    /// Response body could not be understood
    MalformedResponse,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::CredentialMissing => write!(f, "credential_missing"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::AuthExpired => write!(f, "auth_expired"),
            FailureKind::MalformedResponse => write!(f, "malformed_response"),
        }
    }
}

/// Outcome of one poll attempt
///
/// `ok == false` or `used_percent == None` means there is no authoritative
/// reading for this attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageQueryResult {
    pub ok: bool,
    pub used_percent: Option<f64>,
    pub resets_at: Option<DateTime<Utc>>,
    pub error_reason: Option<String>,
    pub failure: Option<FailureKind>,
    pub secondary: Option<WindowReading>,
    /// When the attempt was issued; orders concurrent attempts
    pub observed_at: DateTime<Utc>,
}

impl UsageQueryResult {
    /// Successful attempt carrying the oracle's reading
    pub fn success(reading: UsageReading, observed_at: DateTime<Utc>) -> Self {
        Self {
            ok: true,
            used_percent: reading.used_percent,
            resets_at: reading.resets_at,
            error_reason: None,
            failure: None,
            secondary: reading.secondary,
            observed_at,
        }
    }

    /// Failed attempt
    pub fn failure(
        kind: FailureKind,
        reason: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ok: false,
            used_percent: None,
            resets_at: None,
            error_reason: Some(reason.into()),
            failure: Some(kind),
            secondary: None,
            observed_at,
        }
    }

    /// Whether this attempt produced a reading the engine may trust
    pub fn is_authoritative(&self) -> bool {
        self.ok && self.used_percent.is_some()
    }

    /// Build a snapshot from an authoritative result
    pub fn to_snapshot(&self) -> Option<Snapshot> {
        if !self.ok {
            return None;
        }
        let used = self.used_percent?;
        let mut snapshot = Snapshot::new(used, self.resets_at, self.observed_at);
        if let Some(secondary) = self.secondary {
            snapshot = snapshot.with_secondary(secondary);
        }
        Some(snapshot)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Last known-good reading for a provider
///
/// Never mutated after construction; every poll produces a fresh value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Percentage of quota used (0.0 - 100.0)
    pub used_percent: f64,
    /// When the primary window resets
    pub resets_at: Option<DateTime<Utc>>,
    /// When the reading was taken
    pub observed_at: DateTime<Utc>,
    /// Independent longer window, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<WindowReading>,
}

impl Snapshot {
    pub fn new(
        used_percent: f64,
        resets_at: Option<DateTime<Utc>>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            used_percent: clamp_percent(used_percent),
            resets_at,
            observed_at,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: WindowReading) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Remaining quota, the inverse of `used_percent`
    pub fn remaining_percent(&self) -> f64 {
        remaining_from_used(self.used_percent)
    }

    /// Seconds elapsed since the reading was taken (never negative)
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_seconds().max(0)
    }
}

/// Clamp an oracle-supplied percentage into 0..=100, mapping NaN to 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Convert "used" to "remaining". Every used/remaining inversion goes through here.
pub fn remaining_from_used(used_percent: f64) -> f64 {
    100.0 - clamp_percent(used_percent)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_provider_id_display_and_parse() {
        let id: ProviderId = " claude ".parse().unwrap();
        assert_eq!(id.as_str(), "claude");
        assert_eq!(id.to_string(), "claude");
        assert!("   ".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_provider_id_serde_transparent() {
        let id = ProviderId::new("codex");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"codex\"");
    }

    #[test]
    fn test_snapshot_clamps_percent() {
        let now = Utc::now();
        assert_eq!(Snapshot::new(130.0, None, now).used_percent, 100.0);
        assert_eq!(Snapshot::new(-4.0, None, now).used_percent, 0.0);
        assert_eq!(Snapshot::new(f64::NAN, None, now).used_percent, 0.0);
    }

    #[test]
    fn test_remaining_percent_inverts_used() {
        let snapshot = Snapshot::new(58.0, None, Utc::now());
        assert_eq!(snapshot.remaining_percent(), 42.0);
    }

    #[test]
    fn test_failed_result_has_no_snapshot() {
        let result = UsageQueryResult::failure(FailureKind::Transient, "503", Utc::now());
        assert!(!result.is_authoritative());
        assert!(result.to_snapshot().is_none());
        assert_eq!(result.used_percent, None);
    }

    #[test]
    fn test_ok_result_without_percent_is_not_authoritative() {
        let result = UsageQueryResult::success(UsageReading::default(), Utc::now());
        assert!(result.ok);
        assert!(!result.is_authoritative());
        assert!(result.to_snapshot().is_none());
    }

    #[test]
    fn test_zero_usage_is_authoritative() {
        let reading = UsageReading {
            used_percent: Some(0.0),
            ..Default::default()
        };
        let result = UsageQueryResult::success(reading, Utc::now());
        assert!(result.is_authoritative());
        assert_eq!(result.to_snapshot().unwrap().used_percent, 0.0);
    }

    #[test]
    fn test_snapshot_carries_secondary_window() {
        let now = Utc::now();
        let reading = UsageReading {
            used_percent: Some(12.0),
            resets_at: Some(now + Duration::hours(2)),
            secondary: Some(WindowReading::new(33.0, Some(now + Duration::days(3)))),
        };
        let snapshot = UsageQueryResult::success(reading, now).to_snapshot().unwrap();
        assert_eq!(snapshot.secondary.unwrap().used_percent, 33.0);
        assert_eq!(snapshot.observed_at, now);
    }

    #[test]
    fn test_age_seconds_never_negative() {
        let now = Utc::now();
        let snapshot = Snapshot::new(10.0, None, now + Duration::seconds(30));
        assert_eq!(snapshot.age_seconds(now), 0);
        assert_eq!(snapshot.age_seconds(now + Duration::seconds(90)), 60);
    }
}
