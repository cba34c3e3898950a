//! The compliance report data model.
//!
//! One `ComplianceReport` feeds both renderers: the text form reads these
//! fields and the JSON form serializes them, so the two always agree.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_audit::ChainReport;
use warden_contracts::{event::Resolution, policy::RuleEffect, request::ActionClass};
use warden_correlate::CoverageReport;

use crate::status::StatusSummary;

/// Phase titles, in report order.
pub const PHASES: [&str; 9] = [
    "Governance snapshot",
    "Policy overview",
    "Event tally",
    "Decision matrix",
    "Enforcement coverage",
    "Pending approvals",
    "Ledger integrity",
    "Mutation activity",
    "Overall status",
];

/// The result of one report phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome<T> {
    Complete(T),
    /// The phase could not run; carries the reason.
    Unavailable(String),
}

impl<T> PhaseOutcome<T> {
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::Complete(data),
            Err(e) => Self::Unavailable(e.to_string()),
        }
    }

    pub fn as_ref(&self) -> PhaseOutcome<&T> {
        match self {
            Self::Complete(data) => PhaseOutcome::Complete(data),
            Self::Unavailable(reason) => PhaseOutcome::Unavailable(reason.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PhaseOutcome<U> {
        match self {
            Self::Complete(data) => PhaseOutcome::Complete(f(data)),
            Self::Unavailable(reason) => PhaseOutcome::Unavailable(reason),
        }
    }

    pub fn complete(&self) -> Option<&T> {
        match self {
            Self::Complete(data) => Some(data),
            Self::Unavailable(_) => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Complete(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }
}

/// `[start, end]` of the report, plus the comparison window before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub lookback_secs: u64,
    /// Start of `[prior_start, start)`, the window mutation activity is
    /// compared against.
    pub prior_start: DateTime<Utc>,
}

impl ReportWindow {
    pub fn ending_at(end: DateTime<Utc>, lookback: chrono::Duration) -> Self {
        let start = end - lookback;
        Self {
            start,
            end,
            lookback_secs: lookback.num_seconds().max(0) as u64,
            prior_start: start - lookback,
        }
    }
}

// ── Phase 1 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GovernanceSnapshot {
    pub ledger_enabled: bool,
    pub backend: String,
    pub ledger_events: u64,
    /// `None` when the integrity phase did not complete.
    pub chain_valid: Option<bool>,
    /// `None` when no policy file was loaded.
    pub policies: Option<usize>,
    pub rules: Option<usize>,
    /// `None` when the approval source was unavailable.
    pub pending_approvals: Option<usize>,
}

// ── Phase 2 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyOverview {
    pub id: String,
    pub description: String,
    pub resource_types: Vec<String>,
    pub environments: Vec<String>,
    pub roles: Vec<String>,
    pub rules: Vec<RuleOverview>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOverview {
    pub action: ActionClass,
    pub effect: RuleEffect,
    pub requires_approval: bool,
    pub row_limit: Option<u64>,
    /// `"HH:MM-HH:MM"` with an optional day list.
    pub time_window: Option<String>,
}

// ── Phase 3 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTally {
    pub total: usize,
    /// Every event kind, zero when absent.
    pub by_kind: BTreeMap<String, usize>,
}

// ── Phase 4 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecisionCounts {
    /// Allowed without approval.
    pub allow: usize,
    pub deny: usize,
    /// Allowed subject to approval.
    pub requires_approval: usize,
    pub no_match: usize,
}

impl DecisionCounts {
    pub fn total(&self) -> usize {
        self.allow + self.deny + self.requires_approval + self.no_match
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeniedRequest {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: ActionClass,
    pub resource: String,
    pub environment: String,
    pub trace_id: String,
    pub policy_id: Option<String>,
    pub message: String,
    /// `None` for an engine deny; otherwise how the approval ended.
    pub resolution: Option<Resolution>,
}

impl DeniedRequest {
    /// `"policy"`, `"approval rejected"`, or `"approval expired"`.
    pub fn denied_by(&self) -> String {
        match self.resolution {
            None => "policy".to_string(),
            Some(r) => format!("approval {}", r.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionMatrix {
    /// Engine decisions per `type/id`.
    pub resources: BTreeMap<String, DecisionCounts>,
    pub totals: DecisionCounts,
    /// Approval-sourced decisions (resolutions and expiries), not in the matrix.
    pub approval_overrides: usize,
    /// Every deny in the window, by seq: engine denials plus rejected and
    /// expired approvals.
    pub denied: Vec<DeniedRequest>,
}

// ── Phase 6 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingApprovalRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub age_secs: i64,
    pub actor: String,
    pub action: ActionClass,
    pub resource: String,
    pub trace_id: String,
    pub policy_id: Option<String>,
    /// Older than the configured approval TTL.
    pub overdue: bool,
}

// ── Phase 8 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityDelta {
    pub key: String,
    pub current: usize,
    pub prior: usize,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationActivity {
    pub total: usize,
    pub prior_total: usize,
    pub by_tool: Vec<ActivityDelta>,
    pub by_actor: Vec<ActivityDelta>,
    /// 24 buckets, hour of day in `utc_offset`.
    pub by_hour: Vec<usize>,
    /// e.g. `"+01:00"`.
    pub utc_offset: String,
}

// ── The report ────────────────────────────────────────────────────────────────

/// Everything one reporter run found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub window: ReportWindow,
    pub snapshot: PhaseOutcome<GovernanceSnapshot>,
    pub policies: PhaseOutcome<Vec<PolicyOverview>>,
    pub event_tally: PhaseOutcome<EventTally>,
    pub decisions: PhaseOutcome<DecisionMatrix>,
    pub coverage: PhaseOutcome<CoverageReport>,
    pub approvals: PhaseOutcome<Vec<PendingApprovalRow>>,
    pub integrity: PhaseOutcome<ChainReport>,
    pub mutations: PhaseOutcome<MutationActivity>,
    pub status: StatusSummary,
}

impl ComplianceReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code
    }
}
