//! Approval lifecycle types.
//!
//! A verdict that allows an action but sets `requires_approval` parks the
//! request as a `PendingApproval`. The record transitions exactly once, from
//! `Pending` to one of the terminal states, and survives resolution until the
//! retention policy purges it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{event::Resolution, policy::Verdict, request::RequestContext};

/// Unique identifier of a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    /// Create a new, unique approval id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an approval is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Parse a wire name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// True for every state other than `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The ledger resolution recorded when entering this state.
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::Pending => None,
            Self::Approved => Some(Resolution::Approved),
            Self::Rejected => Some(Resolution::Rejected),
            Self::Expired => Some(Resolution::Expired),
        }
    }
}

/// A human decision on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl ApprovalDecision {
    /// The terminal status this decision moves a record into.
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// A request waiting for (or having received) human sign-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Unique id.
    pub id: ApprovalId,
    /// Snapshot of the request that needs approval.
    pub context: RequestContext,
    /// The verdict that required approval.
    pub verdict: Verdict,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: ApprovalStatus,
    /// Who resolved it (`"system:ttl"` for expiry).
    pub resolver: Option<String>,
    /// When it left `Pending`.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Optional resolver comment.
    pub note: Option<String>,
}

impl PendingApproval {
    /// Create a fresh pending record for `context`.
    pub fn new(context: RequestContext, verdict: Verdict, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ApprovalId::new(),
            context,
            verdict,
            created_at,
            status: ApprovalStatus::Pending,
            resolver: None,
            resolved_at: None,
            note: None,
        }
    }

    /// True if this record and `ctx` describe the same in-flight request.
    pub fn same_request(&self, ctx: &RequestContext) -> bool {
        self.context.actor.id == ctx.actor.id
            && self.context.resource == ctx.resource
            && self.context.action_class == ctx.action_class
            && self.context.trace_id == ctx.trace_id
    }
}

/// Why a notification is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Resolved,
    Expired,
}
