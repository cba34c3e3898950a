//! Overall report status and its exit-code contract.

use std::fmt;

use serde::Serialize;

/// Status tiers, ordered from best to worst. The exit codes are a contract
/// scripts and schedulers depend on; never renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Ok,
    Degraded,
    Alerts,
    ChainInvalid,
}

impl ReportStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Degraded => 1,
            Self::Alerts => 2,
            Self::ChainInvalid => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Alerts => "ALERTS",
            Self::ChainInvalid => "CHAIN_INVALID",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase 9: the verdict on the whole report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub status: ReportStatus,
    pub exit_code: i32,
    /// One line per alerting condition.
    pub alerts: Vec<String>,
    /// One line per phase that could not complete.
    pub degraded: Vec<String>,
}

/// Accumulates conditions while phases are evaluated; the worst wins.
#[derive(Debug, Default)]
pub struct StatusBuilder {
    chain_invalid: bool,
    alerts: Vec<String>,
    degraded: Vec<String>,
}

impl StatusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_invalid(&mut self, line: impl Into<String>) {
        self.chain_invalid = true;
        self.alerts.push(line.into());
    }

    pub fn alert(&mut self, line: impl Into<String>) {
        self.alerts.push(line.into());
    }

    pub fn degraded(&mut self, line: impl Into<String>) {
        self.degraded.push(line.into());
    }

    pub fn finish(self) -> StatusSummary {
        let status = if self.chain_invalid {
            ReportStatus::ChainInvalid
        } else if !self.alerts.is_empty() {
            ReportStatus::Alerts
        } else if !self.degraded.is_empty() {
            ReportStatus::Degraded
        } else {
            ReportStatus::Ok
        };
        StatusSummary {
            status,
            exit_code: status.exit_code(),
            alerts: self.alerts,
            degraded: self.degraded,
        }
    }
}
