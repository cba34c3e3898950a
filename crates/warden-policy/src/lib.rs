//! # warden-policy
//!
//! The policy store and decision engine for WARDEN.
//!
//! ## Overview
//!
//! [`PolicyStore`] loads policies from a TOML file, validates them, and
//! compiles their time windows. [`PolicyDecisionEngine`] implements the
//! [`DecisionEngine`](warden_core::traits::DecisionEngine) trait over a shared
//! store with a fixed precedence order:
//!
//! 1. active time-scoped deny
//! 2. unconditional deny
//! 3. merged allow (approval OR-ed, row limit minimum)
//! 4. no match
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::{path::Path, sync::Arc};
//! use warden_policy::{PolicyDecisionEngine, PolicyStore};
//!
//! let store = Arc::new(PolicyStore::from_file(Path::new("policies/prod.toml"))?);
//! let engine = PolicyDecisionEngine::new(store);
//! ```

pub mod engine;
pub mod store;
pub mod window;

pub use engine::PolicyDecisionEngine;
pub use store::{LoadedPolicy, PolicyStore};
pub use window::CompiledWindow;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use warden_contracts::{
        policy::VerdictEffect,
        request::{ActionClass, Actor, Origin, RequestContext, Resource},
    };
    use warden_core::traits::DecisionEngine;

    use crate::{PolicyDecisionEngine, PolicyStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn engine(toml: &str) -> PolicyDecisionEngine {
        PolicyDecisionEngine::new(Arc::new(PolicyStore::from_toml_str(toml).unwrap()))
    }

    /// Wednesday 2026-03-04 at the given UTC hour.
    fn wednesday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, hour, 0, 0).unwrap()
    }

    fn ctx(resource_type: &str, id: &str, env: &str, action: ActionClass) -> RequestContext {
        RequestContext {
            actor: Actor { id: "sre-agent".to_string(), role: "sre".to_string() },
            resource: Resource {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                environment: env.to_string(),
            },
            action_class: action,
            timestamp: wednesday(12),
            trace_id: "trace-1".to_string(),
            origin: Origin::AgentMediated,
        }
    }

    const P1: &str = r#"
        [[policies]]
        id = "P1"
        description = "Production database guard"
        resource_types = ["database"]

        [policies.actions.write]
        effect = "allow"
        requires_approval = true
        row_limit = 1000

        [policies.actions.destructive]
        effect = "deny"
    "#;

    // ── 1. no match ───────────────────────────────────────────────────────────

    /// No policies at all: no_match, not deny, not an error.
    #[test]
    fn test_no_policies_is_no_match() {
        let e = engine("policies = []");
        let v = e.evaluate(&ctx("database", "prod-db", "prod", ActionClass::Read));
        assert_eq!(v.effect, VerdictEffect::NoMatch);
        assert!(v.policy_id.is_none());
    }

    /// A policy covering the resource type but not the action is not a match.
    #[test]
    fn test_uncovered_action_is_no_match() {
        let e = engine(P1);
        let v = e.evaluate(&ctx("database", "prod-db", "prod", ActionClass::Read));
        assert_eq!(v.effect, VerdictEffect::NoMatch);
    }

    // ── 2. single deny ────────────────────────────────────────────────────────

    /// The only matching policy denies destructive: deny with its id.
    #[test]
    fn test_single_policy_deny_reports_policy_id() {
        let toml = format!(
            "{P1}\n{}",
            r#"
            [[policies]]
            id = "clusters"
            resource_types = ["kubernetes"]
            [policies.actions.destructive]
            effect = "allow"
            "#
        );
        let e = engine(&toml);
        let v = e.evaluate(&ctx("database", "prod-db", "prod", ActionClass::Destructive));
        assert_eq!(v.effect, VerdictEffect::Deny);
        assert_eq!(v.policy_id.as_deref(), Some("P1"));
        assert!(!v.requires_approval);
    }

    // ── 3. deny wins ──────────────────────────────────────────────────────────

    #[test]
    fn test_deny_wins_over_allow() {
        let toml = r#"
            [[policies]]
            id = "a-allow"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "allow"

            [[policies]]
            id = "b-deny"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
        "#;
        let v = engine(toml).evaluate(&ctx("database", "db", "prod", ActionClass::Write));
        assert_eq!(v.effect, VerdictEffect::Deny);
        assert_eq!(v.policy_id.as_deref(), Some("b-deny"));
        assert_eq!(v.matched_policies, vec!["b-deny".to_string()]);
    }

    // ── 4. allow merge ────────────────────────────────────────────────────────

    /// requires_approval is OR-ed and row_limit is the minimum.
    #[test]
    fn test_allow_merges_approval_and_row_limit() {
        let toml = r#"
            [[policies]]
            id = "lenient"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "allow"
            row_limit = 5000

            [[policies]]
            id = "strict"
            resource_types = ["*"]
            [policies.actions.write]
            effect = "allow"
            requires_approval = true
            row_limit = 200

            [[policies]]
            id = "unbounded"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "allow"
        "#;
        let v = engine(toml).evaluate(&ctx("database", "db", "prod", ActionClass::Write));
        assert_eq!(v.effect, VerdictEffect::Allow);
        assert!(v.requires_approval, "any approval-requiring allow must set the flag");
        assert_eq!(v.row_limit, Some(200));
        assert_eq!(v.policy_id.as_deref(), Some("lenient"));
        assert_eq!(v.matched_policies.len(), 3);
    }

    #[test]
    fn test_scenario_write_requires_approval_with_row_limit() {
        let v = engine(P1).evaluate(&ctx("database", "prod-db", "prod", ActionClass::Write));
        assert_eq!(v.effect, VerdictEffect::Allow);
        assert!(v.requires_approval);
        assert_eq!(v.row_limit, Some(1000));
        assert_eq!(v.policy_id.as_deref(), Some("P1"));
    }

    // ── 5. time-scoped deny ───────────────────────────────────────────────────

    const FREEZE: &str = r#"
        [[policies]]
        id = "change-freeze"
        resource_types = ["database"]

        [policies.actions.write]
        effect = "deny"
        [policies.actions.write.time_window]
        start = "18:00"
        end = "08:00"

        [policies.actions.destructive]
        effect = "deny"
        [policies.actions.destructive.time_window]
        start = "18:00"
        end = "08:00"

        [[policies]]
        id = "allow-writes"
        resource_types = ["database"]
        [policies.actions.write]
        effect = "allow"
    "#;

    /// An active time-scoped deny overrides an unconditional allow.
    #[test]
    fn test_active_time_scoped_deny_overrides_allow() {
        let e = engine(FREEZE);
        let v = e.evaluate_at(&ctx("database", "db", "prod", ActionClass::Write), wednesday(22));
        assert_eq!(v.effect, VerdictEffect::Deny);
        assert_eq!(v.policy_id.as_deref(), Some("change-freeze"));
        assert!(v.reasons[0].contains("time-scoped"));
    }

    /// Outside its window the time-scoped deny does not apply.
    #[test]
    fn test_closed_window_falls_through_to_allow() {
        let e = engine(FREEZE);
        let v = e.evaluate_at(&ctx("database", "db", "prod", ActionClass::Write), wednesday(12));
        assert_eq!(v.effect, VerdictEffect::Allow);
        assert_eq!(v.policy_id.as_deref(), Some("allow-writes"));
    }

    /// Covered but nothing in force: no_match with the closed window explained.
    #[test]
    fn test_only_closed_windows_is_no_match() {
        let e = engine(FREEZE);
        let v = e.evaluate_at(&ctx("database", "db", "prod", ActionClass::Destructive), wednesday(12));
        assert_eq!(v.effect, VerdictEffect::NoMatch);
        assert!(v.reasons.iter().any(|r| r.contains("window")));
    }

    /// Time-scoped deny outranks an unconditional deny for the deciding id,
    /// even when the unconditional one sorts first.
    #[test]
    fn test_time_scoped_deny_outranks_unconditional_deny() {
        let toml = format!(
            "{FREEZE}\n{}",
            r#"
            [[policies]]
            id = "a-always-deny"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            "#
        );
        let v = engine(&toml).evaluate_at(&ctx("database", "db", "prod", ActionClass::Write), wednesday(23));
        assert_eq!(v.policy_id.as_deref(), Some("change-freeze"));
        assert_eq!(
            v.matched_policies,
            vec!["a-always-deny".to_string(), "change-freeze".to_string()]
        );
    }

    /// Two active time-scoped denies: smallest id decides, both are reported.
    #[test]
    fn test_two_time_scoped_denies_tie_break_on_id() {
        let toml = r#"
            [[policies]]
            id = "z-night"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            [policies.actions.write.time_window]
            start = "20:00"
            end = "06:00"

            [[policies]]
            id = "m-evening"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            [policies.actions.write.time_window]
            start = "17:00"
            end = "23:59"
        "#;
        let v = engine(toml).evaluate_at(&ctx("database", "db", "prod", ActionClass::Write), wednesday(21));
        assert_eq!(v.policy_id.as_deref(), Some("m-evening"));
        assert_eq!(v.reasons.len(), 2);
    }

    // ── 6. scoping ────────────────────────────────────────────────────────────

    #[test]
    fn test_environment_and_role_scoping() {
        let toml = r#"
            [[policies]]
            id = "staging-only"
            resource_types = ["database"]
            environments = ["staging"]
            roles = ["sre"]
            [policies.actions.write]
            effect = "allow"
        "#;
        let e = engine(toml);
        assert_eq!(
            e.evaluate(&ctx("database", "db", "staging", ActionClass::Write)).effect,
            VerdictEffect::Allow
        );
        assert_eq!(
            e.evaluate(&ctx("database", "db", "prod", ActionClass::Write)).effect,
            VerdictEffect::NoMatch
        );

        let mut analyst = ctx("database", "db", "staging", ActionClass::Write);
        analyst.actor.role = "analyst".to_string();
        assert_eq!(e.evaluate(&analyst).effect, VerdictEffect::NoMatch);
    }

    /// Disabled policies are never evaluated.
    #[test]
    fn test_disabled_policy_is_ignored() {
        let toml = r#"
            [[policies]]
            id = "off"
            enabled = false
            resource_types = ["database"]
            [policies.actions.read]
            effect = "deny"
        "#;
        let v = engine(toml).evaluate(&ctx("database", "db", "prod", ActionClass::Read));
        assert_eq!(v.effect, VerdictEffect::NoMatch);
    }

    // ── 7. purity ─────────────────────────────────────────────────────────────

    /// Same inputs, same verdict, from many threads at once.
    #[test]
    fn test_evaluation_is_deterministic_across_threads() {
        let e = engine(FREEZE);
        let request = ctx("database", "db", "prod", ActionClass::Write);
        let expected = e.evaluate_at(&request, wednesday(22));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let e = e.clone();
                let request = request.clone();
                std::thread::spawn(move || e.evaluate_at(&request, wednesday(22)))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    /// The policy file's fixed offset shifts window evaluation.
    #[test]
    fn test_utc_offset_applies_to_windows() {
        let toml = r#"
            utc_offset_minutes = 120

            [[policies]]
            id = "night"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            [policies.actions.write.time_window]
            start = "22:00"
            end = "23:00"
        "#;
        let e = engine(toml);
        // 20:30 UTC is 22:30 at +02:00.
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 20, 30, 0).unwrap();
        assert_eq!(
            e.evaluate_at(&ctx("database", "db", "prod", ActionClass::Write), at).effect,
            VerdictEffect::Deny
        );
    }
}
