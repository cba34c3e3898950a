//! Policy schema and verdict types.
//!
//! The decision engine consumes a `RequestContext` plus a set of `Policy`
//! values and produces a `Verdict`. Policies are deserialized from TOML by
//! `warden-policy`; the shapes live here so the ledger, the approval manager,
//! and the reporter can all describe them without depending on the engine.

use serde::{Deserialize, Serialize};

use crate::request::ActionClass;

/// Wildcard accepted in `Policy::resource_types`.
pub const ANY_RESOURCE_TYPE: &str = "*";

/// The effect a single action rule produces when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Allow,
    Deny,
}

impl RuleEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Day of the week a time window starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Tue => "tue",
            Self::Wed => "wed",
            Self::Thu => "thu",
            Self::Fri => "fri",
            Self::Sat => "sat",
            Self::Sun => "sun",
        }
    }
}

/// A recurring daily window during which a rule is in force.
///
/// Times are `"HH:MM"` in the policy file's fixed UTC offset. A window whose
/// `end` is at or before `start` wraps past midnight (`"22:00"`–`"06:00"`);
/// `start == end` covers the whole day.
///
/// ```toml
/// [policies.actions.destructive.time_window]
/// start = "18:00"
/// end = "08:00"
/// days = ["fri", "sat"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start, `"HH:MM"`.
    pub start: String,
    /// Exclusive end, `"HH:MM"`.
    pub end: String,
    /// Days on which the window opens. Empty means every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<Day>,
}

/// What a policy says about one action class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRule {
    /// Allow or deny.
    pub effect: RuleEffect,

    /// Allow rules only: the request must be approved by a human first.
    #[serde(default)]
    pub requires_approval: bool,

    /// Allow rules only: maximum rows the tool may touch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u64>,

    /// When present, the rule only matches while the window is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

/// Per-action-class rules of a policy. Absent classes are not covered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<ActionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<ActionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive: Option<ActionRule>,
}

impl ActionRules {
    /// The rule for `class`, if the policy covers it.
    pub fn get(&self, class: ActionClass) -> Option<&ActionRule> {
        match class {
            ActionClass::Read => self.read.as_ref(),
            ActionClass::Write => self.write.as_ref(),
            ActionClass::Destructive => self.destructive.as_ref(),
        }
    }

    /// `(class, rule)` pairs in ascending danger order.
    pub fn iter(&self) -> impl Iterator<Item = (ActionClass, &ActionRule)> {
        ActionClass::ALL
            .into_iter()
            .filter_map(move |class| self.get(class).map(|rule| (class, rule)))
    }

    /// Number of action classes covered.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True when no action class is covered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_enabled() -> bool {
    true
}

/// A single access policy loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable identifier recorded in verdicts and the ledger.
    pub id: String,

    /// Human-readable explanation for operators and reports.
    #[serde(default)]
    pub description: String,

    /// Disabled policies are loaded and reported but never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Resource types this policy covers. `"*"` covers every type.
    pub resource_types: Vec<String>,

    /// Environment tags this policy is scoped to. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,

    /// Actor roles this policy is scoped to. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Per-action-class rules.
    #[serde(default)]
    pub actions: ActionRules,
}

impl Policy {
    /// True if `resource_type` is listed (or the policy uses the wildcard).
    pub fn covers_resource_type(&self, resource_type: &str) -> bool {
        self.resource_types
            .iter()
            .any(|t| t == ANY_RESOURCE_TYPE || t == resource_type)
    }
}

/// Top-level structure of a policy file.
///
/// ```toml
/// utc_offset_minutes = 0
///
/// [[policies]]
/// id = "prod-db-guard"
/// resource_types = ["database"]
/// environments = ["prod"]
///
/// [policies.actions.write]
/// effect = "allow"
/// requires_approval = true
/// row_limit = 1000
///
/// [policies.actions.destructive]
/// effect = "deny"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Fixed offset from UTC, in minutes, used to evaluate time windows.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Every policy in the file, enabled or not.
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// The effect of a verdict.
///
/// `NoMatch` is a legitimate outcome, distinct from `Deny`: no enabled policy
/// covered the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictEffect {
    Allow,
    Deny,
    NoMatch,
}

impl VerdictEffect {
    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::NoMatch => "no_match",
        }
    }
}

/// The engine's outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Allow, deny, or no match.
    pub effect: VerdictEffect,

    /// The policy that decided the verdict, if any.
    pub policy_id: Option<String>,

    /// Every policy that contributed, sorted by id.
    #[serde(default)]
    pub matched_policies: Vec<String>,

    /// True if any matching allow rule requires approval.
    #[serde(default)]
    pub requires_approval: bool,

    /// Minimum row limit across matching allow rules that set one.
    #[serde(default)]
    pub row_limit: Option<u64>,

    /// Human-readable explanation, written to the ledger.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl Verdict {
    /// A verdict with no matching policy.
    pub fn no_match(reason: impl Into<String>) -> Self {
        Self {
            effect: VerdictEffect::NoMatch,
            policy_id: None,
            matched_policies: Vec::new(),
            requires_approval: false,
            row_limit: None,
            reasons: vec![reason.into()],
        }
    }

    /// True when the tool may run immediately (allow without approval).
    pub fn permits_execution(&self) -> bool {
        self.effect == VerdictEffect::Allow && !self.requires_approval
    }
}
