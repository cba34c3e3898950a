//! Ledger event types.
//!
//! Every agent process and the gateway emit one of four event shapes. They are
//! modelled as a tagged enum so producers and consumers must handle each kind
//! exhaustively; there is no open-ended untyped record.
//!
//! `Event` wraps a payload with its chain position and hashes. Once appended,
//! an event is never modified or deleted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    policy::{Verdict, VerdictEffect},
    request::{ActionClass, Origin, RequestContext},
};

/// The discriminant of an `EventPayload`, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentReasoning,
    DelegationDecision,
    PolicyDecision,
    ToolExecution,
}

impl EventKind {
    /// Every kind, in report order.
    pub const ALL: [EventKind; 4] = [
        EventKind::AgentReasoning,
        EventKind::DelegationDecision,
        EventKind::PolicyDecision,
        EventKind::ToolExecution,
    ];

    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentReasoning => "agent_reasoning",
            Self::DelegationDecision => "delegation_decision",
            Self::PolicyDecision => "policy_decision",
            Self::ToolExecution => "tool_execution",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent recorded why it chose its next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRecord {
    pub trace_id: String,
    pub agent: String,
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// An agent handed a sub-task to another agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub trace_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub task: String,
    #[serde(default)]
    pub rationale: String,
}

/// How an approval-sourced decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Rejected,
    Expired,
}

impl Resolution {
    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// Who produced a policy decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionSource {
    /// The decision engine evaluated the request.
    Engine,
    /// A human resolved (or the TTL expired) a pending approval.
    Approval {
        approval_id: String,
        resolver: String,
        resolution: Resolution,
    },
}

/// A verdict for one request, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub trace_id: String,
    pub actor: String,
    pub role: String,
    pub resource_type: String,
    pub resource_id: String,
    pub environment: String,
    pub action_class: ActionClass,
    pub origin: Origin,
    pub effect: VerdictEffect,
    pub policy_id: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub row_limit: Option<u64>,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub source: DecisionSource,
}

impl DecisionRecord {
    /// Record an engine verdict for `ctx`.
    pub fn from_verdict(ctx: &RequestContext, verdict: &Verdict) -> Self {
        Self::with_source(ctx, verdict, DecisionSource::Engine)
    }

    /// Record a verdict for `ctx` attributed to `source`.
    pub fn with_source(ctx: &RequestContext, verdict: &Verdict, source: DecisionSource) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            actor: ctx.actor.id.clone(),
            role: ctx.actor.role.clone(),
            resource_type: ctx.resource.resource_type.clone(),
            resource_id: ctx.resource.id.clone(),
            environment: ctx.resource.environment.clone(),
            action_class: ctx.action_class,
            origin: ctx.origin,
            effect: verdict.effect,
            policy_id: verdict.policy_id.clone(),
            requires_approval: verdict.requires_approval,
            row_limit: verdict.row_limit,
            reasons: verdict.reasons.clone(),
            source,
        }
    }

    /// `type/id` of the target resource.
    pub fn resource_key(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

    /// True for decisions made by the engine (not approval overrides).
    pub fn is_engine(&self) -> bool {
        matches!(self.source, DecisionSource::Engine)
    }
}

/// Whether a tool invocation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
}

/// A tool actually ran against infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub trace_id: String,
    pub actor: String,
    pub resource_type: String,
    pub resource_id: String,
    pub environment: String,
    pub action_class: ActionClass,
    pub origin: Origin,
    pub tool: String,
    #[serde(default)]
    pub command: String,
    pub outcome: ExecutionOutcome,
    #[serde(default)]
    pub rows_affected: Option<u64>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// `type/id` of the target resource.
    pub fn resource_key(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// The typed body of a ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    AgentReasoning(ReasoningRecord),
    DelegationDecision(DelegationRecord),
    PolicyDecision(DecisionRecord),
    ToolExecution(ExecutionRecord),
}

impl EventPayload {
    /// The discriminant of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentReasoning(_) => EventKind::AgentReasoning,
            Self::DelegationDecision(_) => EventKind::DelegationDecision,
            Self::PolicyDecision(_) => EventKind::PolicyDecision,
            Self::ToolExecution(_) => EventKind::ToolExecution,
        }
    }

    /// The trace this payload belongs to.
    pub fn trace_id(&self) -> &str {
        match self {
            Self::AgentReasoning(r) => &r.trace_id,
            Self::DelegationDecision(d) => &d.trace_id,
            Self::PolicyDecision(d) => &d.trace_id,
            Self::ToolExecution(e) => &e.trace_id,
        }
    }
}

/// A single entry in the hash-chained ledger.
///
/// Modifying any field (including anything inside `payload`) invalidates
/// `hash` and the successor's `prev_hash`, which `Ledger::verify` detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic position in the chain, starting at 1.
    pub seq: u64,

    /// When the event was appended (UTC).
    pub timestamp: DateTime<Utc>,

    /// The typed event body.
    pub payload: EventPayload,

    /// SHA-256 hex of the previous event, or `GENESIS_HASH` for seq 1.
    pub prev_hash: String,

    /// SHA-256 hex over (prev_hash, payload, seq, timestamp).
    pub hash: String,
}

impl Event {
    /// The sentinel `prev_hash` of the first event in every ledger.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Shorthand for `self.payload.kind()`.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
