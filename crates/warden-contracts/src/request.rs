//! Request identity types.
//!
//! A `RequestContext` describes one attempted tool invocation: who is asking,
//! what they want to touch, how dangerous the operation is, and which
//! end-to-end interaction it belongs to. WARDEN does not prescribe how agents
//! build these; it only evaluates and records them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse danger category of a requested operation.
///
/// Ordering is meaningful: `Read < Write < Destructive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// Observes state without changing it.
    Read,
    /// Changes state in a recoverable way.
    Write,
    /// Drops, truncates, deletes, or otherwise irreversibly changes state.
    Destructive,
}

impl ActionClass {
    /// Every action class, in ascending order of danger.
    pub const ALL: [ActionClass; 3] = [ActionClass::Read, ActionClass::Write, ActionClass::Destructive];

    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Destructive => "destructive",
        }
    }

    /// True for the classes that change state (`write` and `destructive`).
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Write | Self::Destructive)
    }

    /// Parse a wire name back into an action class.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "destructive" => Some(Self::Destructive),
            _ => None,
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request reached the gateway.
///
/// Origin is carried metadata set by whoever builds the request. Nothing in
/// WARDEN infers it from payload content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Issued by an agent as part of an orchestrated interaction.
    AgentMediated,
    /// Issued directly by a human or script, bypassing the agent layer.
    Direct,
}

impl Origin {
    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentMediated => "agent_mediated",
            Self::Direct => "direct",
        }
    }
}

/// The identity requesting access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identity, e.g. `"sre-agent"` or `"alice@example.com"`.
    pub id: String,
    /// Role used for role-scoped policies, e.g. `"sre"`.
    pub role: String,
}

/// The infrastructure target of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type matched against `Policy::resource_types`, e.g. `"database"`.
    pub resource_type: String,
    /// Concrete instance, e.g. `"prod-db"`.
    pub id: String,
    /// Environment tag, e.g. `"prod"`, `"staging"`.
    pub environment: String,
}

impl Resource {
    /// `type/id`, the key used in decision matrices.
    pub fn key(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Everything the decision engine needs to evaluate one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Who is asking.
    pub actor: Actor,
    /// What they want to touch.
    pub resource: Resource,
    /// How dangerous the operation is.
    pub action_class: ActionClass,
    /// When the request was made (UTC).
    pub timestamp: DateTime<Utc>,
    /// Correlation key for the end-to-end interaction.
    pub trace_id: String,
    /// Agent-mediated or direct.
    pub origin: Origin,
}
