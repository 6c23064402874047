//! Threshold classifier
//!
//! Maps a percentage to an ordered zone using per-provider monotonic bounds.
//!
//! Usage bounds are stored in *used* percent (`green < yellow < orange < red = 100`)
//! while the display convention is *remaining* percent (100 = healthy, 0 =
//! exhausted). [`classify_usage`] is the only place that inverts between the
//! two; callers hand it the stored used percentage.

use serde::{Deserialize, Serialize};

use super::types::{clamp_percent, remaining_from_used};
use crate::error::{Error, Result};

// ============================================================================
// Zones
// ============================================================================

/// Severity of remaining quota, least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityZone {
    Green,
    Yellow,
    Orange,
    Red,
}

impl std::fmt::Display for SeverityZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityZone::Green => write!(f, "green"),
            SeverityZone::Yellow => write!(f, "yellow"),
            SeverityZone::Orange => write!(f, "orange"),
            SeverityZone::Red => write!(f, "red"),
        }
    }
}

/// Position within a rolling window, from freshly started to about to reset
///
/// `Blue` means the reset is imminent and is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBand {
    Red,
    Orange,
    Yellow,
    Blue,
}

impl std::fmt::Display for TimeBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeBand::Red => write!(f, "red"),
            TimeBand::Orange => write!(f, "orange"),
            TimeBand::Yellow => write!(f, "yellow"),
            TimeBand::Blue => write!(f, "blue"),
        }
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// Used-percent upper bounds `(green, yellow, orange, red)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct UsageZones {
    green: f64,
    yellow: f64,
    orange: f64,
    red: f64,
}

impl UsageZones {
    /// Build usage bounds, clamping each to 0..=100
    ///
    /// Fails unless `green < yellow < orange < red` and `red == 100`.
    pub fn new(green: f64, yellow: f64, orange: f64, red: f64) -> Result<Self> {
        let [green, yellow, orange, red] = check_ordered("usage", [green, yellow, orange, red])?;
        Ok(Self {
            green,
            yellow,
            orange,
            red,
        })
    }

    pub fn green(&self) -> f64 {
        self.green
    }

    pub fn yellow(&self) -> f64 {
        self.yellow
    }

    pub fn orange(&self) -> f64 {
        self.orange
    }

    pub fn red(&self) -> f64 {
        self.red
    }
}

impl Default for UsageZones {
    fn default() -> Self {
        Self {
            green: 70.0,
            yellow: 85.0,
            orange: 95.0,
            red: 100.0,
        }
    }
}

impl TryFrom<[f64; 4]> for UsageZones {
    type Error = Error;

    fn try_from(v: [f64; 4]) -> Result<Self> {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<UsageZones> for [f64; 4] {
    fn from(z: UsageZones) -> Self {
        [z.green, z.yellow, z.orange, z.red]
    }
}

/// Elapsed-percent upper bounds `(red, orange, yellow, blue)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct TimeZones {
    red: f64,
    orange: f64,
    yellow: f64,
    blue: f64,
}

impl TimeZones {
    /// Build time bounds, clamping each to 0..=100
    ///
    /// Fails unless `red < orange < yellow < blue` and `blue == 100`.
    pub fn new(red: f64, orange: f64, yellow: f64, blue: f64) -> Result<Self> {
        let [red, orange, yellow, blue] = check_ordered("time", [red, orange, yellow, blue])?;
        Ok(Self {
            red,
            orange,
            yellow,
            blue,
        })
    }
}

impl Default for TimeZones {
    fn default() -> Self {
        Self {
            red: 50.0,
            orange: 75.0,
            yellow: 90.0,
            blue: 100.0,
        }
    }
}

impl TryFrom<[f64; 4]> for TimeZones {
    type Error = Error;

    fn try_from(v: [f64; 4]) -> Result<Self> {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<TimeZones> for [f64; 4] {
    fn from(z: TimeZones) -> Self {
        [z.red, z.orange, z.yellow, z.blue]
    }
}

/// Per-provider threshold configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub usage_zones: UsageZones,
    #[serde(default)]
    pub time_zones: TimeZones,
}

/// Clamp to the 0..=100 boundary, then require strict ordering ending at 100
fn check_ordered(kind: &str, bounds: [f64; 4]) -> Result<[f64; 4]> {
    if bounds.iter().any(|b| b.is_nan()) {
        return Err(Error::validation(format!("{} thresholds must be numbers", kind)));
    }

    let clamped = bounds.map(clamp_percent);

    if !clamped.windows(2).all(|pair| pair[0] < pair[1]) {
        return Err(Error::validation(format!(
            "{} thresholds must be strictly increasing, got {:?}",
            kind, clamped
        )));
    }
    if clamped[3] != 100.0 {
        return Err(Error::validation(format!(
            "last {} threshold must be 100, got {}",
            kind, clamped[3]
        )));
    }

    Ok(clamped)
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a stored used percentage
///
/// Inverts to remaining percent, then scans from the most severe zone
/// (least remaining) to the least severe.
pub fn classify_usage(used_percent: f64, zones: &UsageZones) -> SeverityZone {
    classify_remaining(remaining_from_used(used_percent), zones)
}

/// Classify a remaining percentage against used-percent bounds
pub fn classify_remaining(remaining_percent: f64, zones: &UsageZones) -> SeverityZone {
    let remaining = clamp_percent(remaining_percent);

    let scan = [
        (remaining_from_used(zones.orange), SeverityZone::Red),
        (remaining_from_used(zones.yellow), SeverityZone::Orange),
        (remaining_from_used(zones.green), SeverityZone::Yellow),
    ];

    scan.iter()
        .find(|(upper, _)| remaining <= *upper)
        .map(|(_, zone)| *zone)
        .unwrap_or(SeverityZone::Green)
}

/// Classify how far through its window a provider is
pub fn classify_elapsed(elapsed_percent: f64, zones: &TimeZones) -> TimeBand {
    let elapsed = clamp_percent(elapsed_percent);

    if elapsed < zones.red {
        TimeBand::Red
    } else if elapsed < zones.orange {
        TimeBand::Orange
    } else if elapsed < zones.yellow {
        TimeBand::Yellow
    } else {
        TimeBand::Blue
    }
}

// ============================================================================
// Tests
// ============================================================================
