//! Reporter configuration.
//!
//! Loaded from an optional TOML file; every field has a default, and the CLI
//! overrides individual values after loading. Durations are written as
//! `<n>ms`, `<n>s`, `<n>m`, `<n>h`, or `<n>d`.
//!
//! ```toml
//! lookback = "24h"
//! utc_offset_minutes = 60
//! gateway_url = "http://warden-gateway:8080"
//! webhook_url = "https://hooks.example.com/compliance"
//! approval_ttl = "1h"
//!
//! [retry]
//! attempts = 4
//! initial_delay = "250ms"
//! max_delay = "5s"
//! ```

use std::{path::Path, path::PathBuf, time::Duration};

use chrono::FixedOffset;
use serde::{Deserialize, Deserializer, Serialize};

use warden_contracts::error::WardenError;

use crate::retry::RetryPolicy;

/// Parse `<n>ms|s|m|h|d` into a duration.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}': expected <number><unit>"))?;
    let secs = match unit {
        "ms" => return Ok(Duration::from_millis(n)),
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "" => return Err(format!("invalid duration '{s}': missing unit (ms, s, m, h, d)")),
        other => return Err(format!("invalid duration '{s}': unknown unit '{other}'")),
    };
    n.checked_mul(secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("invalid duration '{s}': too large"))
}

/// `Duration` formatted back into the largest exact unit.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_nanos() != 0 || secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
}

pub(crate) fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn de_opt_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn ser_duration<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_duration(*d))
}

/// Everything the reporter and the CLI need to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReporterConfig {
    /// Length of the report window ending now.
    #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
    pub lookback: Duration,

    /// Fixed offset for hour-of-day bucketing.
    pub utc_offset_minutes: i32,

    /// Read the ledger from a gateway over HTTP.
    pub gateway_url: Option<String>,

    /// Read the ledger from a local SQLite file.
    pub ledger_db: Option<PathBuf>,

    /// Policy file for the policy overview and counts.
    pub policies: Option<PathBuf>,

    /// Where `--webhook` posts the JSON report.
    pub webhook_url: Option<String>,

    /// Pending approvals older than this are flagged overdue.
    #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
    pub approval_ttl: Duration,

    /// Give up on the integrity check after this long.
    #[serde(deserialize_with = "de_opt_duration", skip_serializing_if = "Option::is_none")]
    pub verify_timeout: Option<Duration>,

    pub retry: RetryPolicy,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(24 * 3_600),
            utc_offset_minutes: 0,
            gateway_url: None,
            ledger_db: None,
            policies: None,
            webhook_url: None,
            approval_ttl: Duration::from_secs(3_600),
            verify_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

fn config_error(reason: impl Into<String>) -> WardenError {
    WardenError::Config { reason: reason.into() }
}

impl ReporterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, WardenError> {
        let config: Self = toml::from_str(s).map_err(|e| config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, WardenError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read '{}': {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Reject values that would make the report meaningless.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.lookback.is_zero() {
            return Err(config_error("lookback must be positive"));
        }
        if chrono::Duration::from_std(self.lookback * 2).is_err() {
            return Err(config_error("lookback is too large"));
        }
        if chrono::Duration::from_std(self.approval_ttl).is_err() {
            return Err(config_error("approval_ttl is too large"));
        }
        self.utc_offset()?;
        if self.retry.attempts == 0 {
            return Err(config_error("retry.attempts must be at least 1"));
        }
        if self.gateway_url.is_some() && self.ledger_db.is_some() {
            return Err(config_error("gateway_url and ledger_db are mutually exclusive"));
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, WardenError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| config_error(format!("utc_offset_minutes {} is out of range", self.utc_offset_minutes)))
    }
}
