//! The pure analyses behind report phases 2, 3, 4, 6, and 8.
//!
//! Each takes already-fetched data and returns a section of the report. The
//! reporter owns every store call.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Timelike, Utc};

use warden_contracts::{
    approval::PendingApproval,
    event::{DecisionSource, Event, EventKind, EventPayload},
    policy::{TimeWindow, VerdictEffect},
};
use warden_policy::PolicyStore;

use crate::report::{
    ActivityDelta, DecisionMatrix, DeniedRequest, EventTally, MutationActivity, PendingApprovalRow, PolicyOverview,
    RuleOverview,
};

fn format_window(window: &TimeWindow) -> String {
    if window.days.is_empty() {
        return format!("{}-{}", window.start, window.end);
    }
    let days: Vec<&str> = window.days.iter().map(|d| d.as_str()).collect();
    format!("{}-{} {}", window.start, window.end, days.join(","))
}

/// Phase 2: enabled policies, by id.
pub fn policy_overview(store: &PolicyStore) -> Vec<PolicyOverview> {
    let mut overview: Vec<PolicyOverview> = store
        .enabled()
        .map(|loaded| {
            let p = &loaded.policy;
            PolicyOverview {
                id: p.id.clone(),
                description: p.description.clone(),
                resource_types: p.resource_types.clone(),
                environments: p.environments.clone(),
                roles: p.roles.clone(),
                rules: p
                    .actions
                    .iter()
                    .map(|(action, rule)| RuleOverview {
                        action,
                        effect: rule.effect,
                        requires_approval: rule.requires_approval,
                        row_limit: rule.row_limit,
                        time_window: rule.time_window.as_ref().map(format_window),
                    })
                    .collect(),
            }
        })
        .collect();
    overview.sort_by(|a, b| a.id.cmp(&b.id));
    overview
}

/// Phase 3.
pub fn event_tally(events: &[Event]) -> EventTally {
    let mut by_kind: BTreeMap<String, usize> =
        EventKind::ALL.iter().map(|k| (k.as_str().to_string(), 0)).collect();
    for event in events {
        *by_kind.entry(event.kind().as_str().to_string()).or_default() += 1;
    }
    EventTally { total: events.len(), by_kind }
}

/// Phase 4. Only engine decisions land in the matrix; approval overrides are
/// counted separately so a rejection is not reported as a policy denial. Both
/// kinds of deny are listed, tagged with where they came from.
pub fn decision_matrix(events: &[Event]) -> DecisionMatrix {
    let mut matrix = DecisionMatrix::default();

    for event in events {
        let EventPayload::PolicyDecision(d) = &event.payload else {
            continue;
        };
        let resolution = match &d.source {
            DecisionSource::Engine => None,
            DecisionSource::Approval { resolution, .. } => Some(*resolution),
        };

        if resolution.is_some() {
            matrix.approval_overrides += 1;
        } else {
            let counts = matrix.resources.entry(d.resource_key()).or_default();
            for c in [counts, &mut matrix.totals] {
                match d.effect {
                    VerdictEffect::Allow if d.requires_approval => c.requires_approval += 1,
                    VerdictEffect::Allow => c.allow += 1,
                    VerdictEffect::Deny => c.deny += 1,
                    VerdictEffect::NoMatch => c.no_match += 1,
                }
            }
        }

        if d.effect == VerdictEffect::Deny {
            matrix.denied.push(DeniedRequest {
                seq: event.seq,
                timestamp: event.timestamp,
                actor: d.actor.clone(),
                action: d.action_class,
                resource: d.resource_key(),
                environment: d.environment.clone(),
                trace_id: d.trace_id.clone(),
                policy_id: d.policy_id.clone(),
                message: if d.reasons.is_empty() {
                    "denied".to_string()
                } else {
                    d.reasons.join("; ")
                },
                resolution,
            });
        }
    }
    matrix
}

/// Phase 6: oldest first, flagged when older than `ttl`.
pub fn pending_rows(approvals: &[PendingApproval], now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<PendingApprovalRow> {
    let mut rows: Vec<PendingApprovalRow> = approvals
        .iter()
        .map(|a| {
            let age = now - a.created_at;
            PendingApprovalRow {
                id: a.id.to_string(),
                created_at: a.created_at,
                age_secs: age.num_seconds(),
                actor: a.context.actor.id.clone(),
                action: a.context.action_class,
                resource: a.context.resource.key(),
                trace_id: a.context.trace_id.clone(),
                policy_id: a.verdict.policy_id.clone(),
                overdue: age >= ttl,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    rows
}

#[derive(Default)]
struct MutationCounts {
    total: usize,
    by_tool: BTreeMap<String, usize>,
    by_actor: BTreeMap<String, usize>,
    by_hour: [usize; 24],
}

fn count_mutations(events: &[Event], offset: FixedOffset) -> MutationCounts {
    let mut counts = MutationCounts::default();
    for event in events {
        let EventPayload::ToolExecution(e) = &event.payload else {
            continue;
        };
        if !e.action_class.is_mutation() {
            continue;
        }
        counts.total += 1;
        *counts.by_tool.entry(e.tool.clone()).or_default() += 1;
        *counts.by_actor.entry(e.actor.clone()).or_default() += 1;
        counts.by_hour[event.timestamp.with_timezone(&offset).hour() as usize] += 1;
    }
    counts
}

fn deltas(current: &BTreeMap<String, usize>, prior: &BTreeMap<String, usize>) -> Vec<ActivityDelta> {
    let mut keys: Vec<&String> = current.keys().chain(prior.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .map(|key| {
            let c = current.get(key).copied().unwrap_or(0);
            let p = prior.get(key).copied().unwrap_or(0);
            ActivityDelta {
                key: key.clone(),
                current: c,
                prior: p,
                delta: c as i64 - p as i64,
            }
        })
        .collect()
}

/// Phase 8: write and destructive executions in `current`, compared with
/// `prior`. Hours bucket only the current window.
pub fn mutation_activity(current: &[Event], prior: &[Event], offset: FixedOffset) -> MutationActivity {
    let now = count_mutations(current, offset);
    let before = count_mutations(prior, offset);
    MutationActivity {
        total: now.total,
        prior_total: before.total,
        by_tool: deltas(&now.by_tool, &before.by_tool),
        by_actor: deltas(&now.by_actor, &before.by_actor),
        by_hour: now.by_hour.to_vec(),
        utc_offset: offset.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

    use warden_contracts::{
        approval::PendingApproval,
        event::{DecisionRecord, DecisionSource, Event, EventPayload, ExecutionOutcome, ExecutionRecord, Resolution},
        policy::{Verdict, VerdictEffect},
        request::{ActionClass, Actor, Origin, RequestContext, Resource},
    };
    use warden_policy::PolicyStore;

    use super::{decision_matrix, event_tally, mutation_activity, pending_rows, policy_overview};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
    }

    fn ctx(trace: &str, action: ActionClass) -> RequestContext {
        RequestContext {
            actor: Actor { id: "sre-agent".to_string(), role: "sre".to_string() },
            resource: Resource {
                resource_type: "database".to_string(),
                id: "prod-db".to_string(),
                environment: "prod".to_string(),
            },
            action_class: action,
            timestamp: t0(),
            trace_id: trace.to_string(),
            origin: Origin::AgentMediated,
        }
    }

    fn verdict(effect: VerdictEffect, requires_approval: bool) -> Verdict {
        Verdict {
            effect,
            policy_id: Some("P1".to_string()),
            matched_policies: vec!["P1".to_string()],
            requires_approval,
            row_limit: None,
            reasons: vec![format!("{} by policy 'P1'", effect.as_str())],
        }
    }

    fn event(seq: u64, at: DateTime<Utc>, payload: EventPayload) -> Event {
        Event {
            seq,
            timestamp: at,
            payload,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    fn decision(seq: u64, action: ActionClass, v: Verdict) -> Event {
        event(seq, t0(), EventPayload::PolicyDecision(DecisionRecord::from_verdict(&ctx("t-1", action), &v)))
    }

    fn execution(seq: u64, at: DateTime<Utc>, tool: &str, actor: &str, action: ActionClass) -> Event {
        event(
            seq,
            at,
            EventPayload::ToolExecution(ExecutionRecord {
                trace_id: "t-1".to_string(),
                actor: actor.to_string(),
                resource_type: "database".to_string(),
                resource_id: "prod-db".to_string(),
                environment: "prod".to_string(),
                action_class: action,
                origin: Origin::AgentMediated,
                tool: tool.to_string(),
                command: String::new(),
                outcome: ExecutionOutcome::Success,
                rows_affected: None,
                duration_ms: 5,
            }),
        )
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_overview_lists_enabled_policies_by_id() {
        let store = PolicyStore::from_toml_str(
            r#"
            [[policies]]
            id = "P2"
            resource_types = ["database"]
            [policies.actions.destructive]
            effect = "deny"
            [policies.actions.destructive.time_window]
            start = "18:00"
            end = "08:00"
            days = ["fri", "sat"]

            [[policies]]
            id = "P1"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "allow"
            requires_approval = true
            row_limit = 1000

            [[policies]]
            id = "P0"
            enabled = false
            resource_types = ["database"]
            [policies.actions.read]
            effect = "allow"
            "#,
        )
        .unwrap();

        let overview = policy_overview(&store);
        let ids: Vec<&str> = overview.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);
        assert_eq!(overview[0].rules[0].row_limit, Some(1000));
        assert_eq!(overview[1].rules[0].time_window.as_deref(), Some("18:00-08:00 fri,sat"));
    }

    #[test]
    fn test_tally_includes_absent_kinds() {
        let tally = event_tally(&[decision(1, ActionClass::Read, verdict(VerdictEffect::Allow, false))]);
        assert_eq!(tally.total, 1);
        assert_eq!(tally.by_kind["policy_decision"], 1);
        assert_eq!(tally.by_kind["tool_execution"], 0);
        assert_eq!(tally.by_kind.len(), 4);
    }

    #[test]
    fn test_matrix_separates_categories_and_lists_denials() {
        let mut override_record =
            DecisionRecord::from_verdict(&ctx("t-1", ActionClass::Write), &verdict(VerdictEffect::Deny, false));
        override_record.source = DecisionSource::Approval {
            approval_id: "a-1".to_string(),
            resolver: "alice".to_string(),
            resolution: Resolution::Rejected,
        };
        let events = vec![
            decision(1, ActionClass::Read, verdict(VerdictEffect::Allow, false)),
            decision(2, ActionClass::Write, verdict(VerdictEffect::Allow, true)),
            decision(3, ActionClass::Destructive, verdict(VerdictEffect::Deny, false)),
            decision(4, ActionClass::Read, Verdict::no_match("no policy covers 'database'")),
            event(5, t0(), EventPayload::PolicyDecision(override_record)),
        ];

        let matrix = decision_matrix(&events);
        let row = matrix.resources["database/prod-db"];
        assert_eq!((row.allow, row.requires_approval, row.deny, row.no_match), (1, 1, 1, 1));
        assert_eq!(matrix.totals, row);
        assert_eq!(matrix.approval_overrides, 1);

        assert_eq!(matrix.denied.len(), 2);
        let denied = &matrix.denied[0];
        assert_eq!(denied.seq, 3);
        assert_eq!(denied.action, ActionClass::Destructive);
        assert_eq!(denied.policy_id.as_deref(), Some("P1"));
        assert!(denied.message.contains("P1"));
        assert_eq!(denied.resolution, None);
        assert_eq!(denied.denied_by(), "policy");

        let rejected = &matrix.denied[1];
        assert_eq!(rejected.seq, 5);
        assert_eq!(rejected.resolution, Some(Resolution::Rejected));
        assert_eq!(rejected.denied_by(), "approval rejected");
    }

    #[test]
    fn test_expired_approval_is_listed_but_not_counted() {
        let mut expired =
            DecisionRecord::from_verdict(&ctx("t-9", ActionClass::Write), &verdict(VerdictEffect::Deny, false));
        expired.source = DecisionSource::Approval {
            approval_id: "a-9".to_string(),
            resolver: "system:ttl".to_string(),
            resolution: Resolution::Expired,
        };
        let mut approved =
            DecisionRecord::from_verdict(&ctx("t-8", ActionClass::Write), &verdict(VerdictEffect::Allow, false));
        approved.source = DecisionSource::Approval {
            approval_id: "a-8".to_string(),
            resolver: "alice".to_string(),
            resolution: Resolution::Approved,
        };
        let events = vec![
            event(1, t0(), EventPayload::PolicyDecision(approved)),
            event(2, t0(), EventPayload::PolicyDecision(expired)),
        ];

        let matrix = decision_matrix(&events);
        assert!(matrix.resources.is_empty());
        assert_eq!(matrix.totals.deny, 0);
        assert_eq!(matrix.approval_overrides, 2);
        assert_eq!(matrix.denied.len(), 1);
        assert_eq!(matrix.denied[0].trace_id, "t-9");
        assert_eq!(matrix.denied[0].denied_by(), "approval expired");
    }

    #[test]
    fn test_pending_rows_flag_overdue() {
        let fresh = PendingApproval::new(ctx("t-1", ActionClass::Write), verdict(VerdictEffect::Allow, true), t0());
        let stale = PendingApproval::new(
            ctx("t-2", ActionClass::Write),
            verdict(VerdictEffect::Allow, true),
            t0() - Duration::hours(3),
        );

        let rows = pending_rows(&[fresh, stale], t0() + Duration::minutes(10), Duration::hours(1));
        assert_eq!(rows[0].trace_id, "t-2");
        assert!(rows[0].overdue);
        assert!(!rows[1].overdue);
        assert_eq!(rows[1].age_secs, 600);
    }

    #[test]
    fn test_mutations_compare_against_prior_window() {
        let current = vec![
            execution(10, t0(), "psql", "sre-agent", ActionClass::Write),
            execution(11, t0() + Duration::minutes(5), "psql", "sre-agent", ActionClass::Destructive),
            execution(12, t0() + Duration::hours(2), "kubectl", "deploy-bot", ActionClass::Write),
            execution(13, t0(), "psql", "sre-agent", ActionClass::Read),
        ];
        let prior = vec![
            execution(1, t0() - Duration::days(1), "kubectl", "deploy-bot", ActionClass::Write),
            execution(2, t0() - Duration::days(1), "kubectl", "deploy-bot", ActionClass::Write),
        ];

        let activity = mutation_activity(&current, &prior, FixedOffset::east_opt(3_600).unwrap());
        assert_eq!(activity.total, 3);
        assert_eq!(activity.prior_total, 2);
        assert_eq!(activity.utc_offset, "+01:00");
        assert_eq!(activity.by_hour[11], 2);
        assert_eq!(activity.by_hour[13], 1);
        assert_eq!(activity.by_hour.iter().sum::<usize>(), 3);

        let kubectl = activity.by_tool.iter().find(|d| d.key == "kubectl").unwrap();
        assert_eq!((kubectl.current, kubectl.prior, kubectl.delta), (1, 2, -1));
        let psql = activity.by_tool.iter().find(|d| d.key == "psql").unwrap();
        assert_eq!(psql.delta, 2);
        assert_eq!(activity.by_actor.len(), 2);
    }
}
