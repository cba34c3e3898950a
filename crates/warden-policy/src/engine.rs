//! Deterministic precedence decision engine.
//!
//! `PolicyDecisionEngine` implements the `DecisionEngine` trait from
//! warden-core over a shared `PolicyStore`.
//!
//! Evaluation algorithm, identical on every call:
//!
//! 1. Collect every enabled policy that covers the resource type and has a
//!    rule for the action class. None → `no_match`.
//! 2. Drop candidates scoped away by environment or role, and rules whose
//!    time window is closed at the evaluation time.
//! 3. Precedence, first non-empty tier wins:
//!    a. active time-scoped deny
//!    b. unconditional deny
//!    c. merged allow: `requires_approval` is OR-ed, `row_limit` is the minimum
//!    d. `no_match` (covered, but nothing in force)
//!
//! Within a tier the policy with the lexicographically smallest id is the
//! deciding `policy_id`; all contributing ids are reported.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use warden_contracts::{
    policy::{ActionRule, RuleEffect, Verdict, VerdictEffect},
    request::RequestContext,
};
use warden_core::traits::DecisionEngine;

use crate::{store::PolicyStore, window::CompiledWindow};

/// A matching rule that is in force for the request.
struct Candidate<'a> {
    policy_id: &'a str,
    rule: &'a ActionRule,
    window: Option<&'a CompiledWindow>,
}

/// A `DecisionEngine` over an immutable `PolicyStore`.
///
/// Cloning is cheap; all clones share the same store.
#[derive(Debug, Clone)]
pub struct PolicyDecisionEngine {
    store: Arc<PolicyStore>,
}

impl PolicyDecisionEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// The policy set this engine evaluates against.
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }
}

impl DecisionEngine for PolicyDecisionEngine {
    fn evaluate_at(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Verdict {
        let resource_type = ctx.resource.resource_type.as_str();
        let class = ctx.action_class;
        let local = now.with_timezone(&self.store.utc_offset()).naive_local();

        let mut covering = 0usize;
        let mut inactive: Vec<String> = Vec::new();
        let mut timed_denies: Vec<Candidate<'_>> = Vec::new();
        let mut denies: Vec<Candidate<'_>> = Vec::new();
        let mut allows: Vec<Candidate<'_>> = Vec::new();

        for loaded in self.store.enabled() {
            let policy = &loaded.policy;
            if !policy.covers_resource_type(resource_type) {
                continue;
            }
            let Some((rule, window)) = loaded.rule(class) else {
                continue;
            };
            covering += 1;

            if !policy.environments.is_empty() && !policy.environments.contains(&ctx.resource.environment) {
                inactive.push(format!("'{}' is scoped to environments {:?}", policy.id, policy.environments));
                continue;
            }
            if !policy.roles.is_empty() && !policy.roles.contains(&ctx.actor.role) {
                inactive.push(format!("'{}' is scoped to roles {:?}", policy.id, policy.roles));
                continue;
            }
            if let Some(w) = window {
                if !w.is_active(local) {
                    inactive.push(format!("'{}' {} window {} is closed", policy.id, class, w.describe()));
                    continue;
                }
            }

            let candidate = Candidate { policy_id: &policy.id, rule, window };
            match (rule.effect, window.is_some()) {
                (RuleEffect::Deny, true) => timed_denies.push(candidate),
                (RuleEffect::Deny, false) => denies.push(candidate),
                (RuleEffect::Allow, _) => allows.push(candidate),
            }
        }

        for tier in [&mut timed_denies, &mut denies, &mut allows] {
            tier.sort_by(|a, b| a.policy_id.cmp(b.policy_id));
        }

        let verdict = if covering == 0 {
            Verdict::no_match(format!(
                "no enabled policy covers {} on resource type '{}'",
                class, resource_type
            ))
        } else if !timed_denies.is_empty() || !denies.is_empty() {
            deny_verdict(&timed_denies, &denies)
        } else if !allows.is_empty() {
            allow_verdict(&allows)
        } else {
            let mut verdict = Verdict::no_match(format!(
                "{} polic(ies) cover {} on '{}' but none is in force",
                covering, class, resource_type
            ));
            verdict.reasons.extend(inactive);
            verdict
        };

        match verdict.effect {
            VerdictEffect::Deny => warn!(
                trace_id = %ctx.trace_id,
                actor = %ctx.actor.id,
                resource = %ctx.resource.key(),
                action = %class,
                policy_id = ?verdict.policy_id,
                "request denied"
            ),
            _ => debug!(
                trace_id = %ctx.trace_id,
                resource = %ctx.resource.key(),
                action = %class,
                effect = verdict.effect.as_str(),
                policy_id = ?verdict.policy_id,
                requires_approval = verdict.requires_approval,
                "request evaluated"
            ),
        }

        verdict
    }
}

/// Build a deny verdict. Time-scoped denies outrank unconditional ones.
fn deny_verdict(timed: &[Candidate<'_>], unconditional: &[Candidate<'_>]) -> Verdict {
    let mut reasons = Vec::new();
    for c in timed {
        let window = c.window.map(CompiledWindow::describe).unwrap_or_default();
        reasons.push(format!("denied by time-scoped policy '{}' (window {} active)", c.policy_id, window));
    }
    for c in unconditional {
        reasons.push(format!("denied by policy '{}'", c.policy_id));
    }

    let decisive = timed.first().or_else(|| unconditional.first());
    let mut matched: Vec<String> = timed
        .iter()
        .chain(unconditional)
        .map(|c| c.policy_id.to_string())
        .collect();
    matched.sort();
    matched.dedup();

    Verdict {
        effect: VerdictEffect::Deny,
        policy_id: decisive.map(|c| c.policy_id.to_string()),
        matched_policies: matched,
        requires_approval: false,
        row_limit: None,
        reasons,
    }
}

/// Merge every in-force allow rule into one verdict.
fn allow_verdict(allows: &[Candidate<'_>]) -> Verdict {
    let requires_approval = allows.iter().any(|c| c.rule.requires_approval);
    let row_limit = allows.iter().filter_map(|c| c.rule.row_limit).min();

    let mut reasons = vec![format!(
        "allowed by {}",
        allows
            .iter()
            .map(|c| format!("'{}'", c.policy_id))
            .collect::<Vec<_>>()
            .join(", ")
    )];
    for c in allows.iter().filter(|c| c.rule.requires_approval) {
        reasons.push(format!("approval required by '{}'", c.policy_id));
    }
    if let Some(limit) = row_limit {
        let from = allows
            .iter()
            .find(|c| c.rule.row_limit == Some(limit))
            .map(|c| c.policy_id)
            .unwrap_or_default();
        reasons.push(format!("row limit {} from '{}'", limit, from));
    }

    let mut matched: Vec<String> = allows.iter().map(|c| c.policy_id.to_string()).collect();
    matched.dedup();

    Verdict {
        effect: VerdictEffect::Allow,
        policy_id: allows.first().map(|c| c.policy_id.to_string()),
        matched_policies: matched,
        requires_approval,
        row_limit,
        reasons,
    }
}
