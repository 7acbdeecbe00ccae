//! Configuration
//!
//! Plain structs with sensible defaults. A whole [`CoreConfig`] can be read
//! from YAML; durations are written as strings such as `"250ms"` or `"2s"`.
//!
//! ```yaml
//! queue:
//!   discipline: sstf
//!   maxOutstanding: 4
//! recon:
//!   sectorsPerRu: 128
//!   eventTimeout: 500ms
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::DisciplineKind;

// =============================================================================
// Queue Configuration
// =============================================================================

/// Per-disk queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// Ordering policy for waiting requests
    pub discipline: DisciplineKind,

    /// Maximum requests dispatched to the device at once
    pub max_outstanding: usize,

    /// Waiting requests the discipline is primed for
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            discipline: DisciplineKind::Fifo,
            max_outstanding: 1,
            capacity: 64,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_outstanding == 0 {
            return Err(Error::InvalidConfig(
                "maxOutstanding must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Reconstruction Configuration
// =============================================================================

/// Reconstruction tracking and control-loop pacing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconConfig {
    /// Sectors per reconstruction unit
    pub sectors_per_ru: u64,

    /// Reconstruction units reserved as distributed spare space
    pub spare_ru_count: u64,

    /// Longest single wait for the next event
    #[serde(with = "duration_str")]
    pub event_timeout: Duration,

    /// Time the control loop may run without blocking
    #[serde(with = "duration_str")]
    pub yield_budget: Duration,

    /// Pause taken once the budget is spent
    #[serde(with = "duration_str")]
    pub yield_pause: Duration,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            sectors_per_ru: 64,
            spare_ru_count: 0,
            event_timeout: Duration::from_millis(500),
            yield_budget: Duration::from_millis(50),
            yield_pause: Duration::from_millis(1),
        }
    }
}

impl ReconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sectors_per_ru == 0 {
            return Err(Error::InvalidConfig(
                "sectorsPerRu must be at least 1".to_string(),
            ));
        }
        if self.event_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "eventTimeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Core Configuration
// =============================================================================

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub queue: QueueConfig,
    pub recon: ReconConfig,
}

impl CoreConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: CoreConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.recon.validate()
    }
}

// =============================================================================
// Durations
// =============================================================================

/// Parse a duration string like "500ms", "30s", "5m", "1h", "1h30m".
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut num_buf = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            num_buf.push(c);
            chars.next();
        }
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;

        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
            unit.push(c);
            chars.next();
        }

        let part = match unit.to_lowercase().as_str() {
            "ms" => Some(Duration::from_millis(num)),
            "s" | "" => Some(Duration::from_secs(num)),
            "m" => num.checked_mul(60).map(Duration::from_secs),
            "h" => num.checked_mul(3600).map(Duration::from_secs),
            "d" => num.checked_mul(86400).map(Duration::from_secs),
            other => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    other
                )))
            }
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| Error::DurationParse(format!("duration out of range: {}", s)))?;
    }

    Ok(total)
}

/// Render a duration in the shortest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{}ms", ms)
    } else {
        format!("{}s", ms / 1000)
    }
}

pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
