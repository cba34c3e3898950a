//! # warden-correlate
//!
//! Cross-references policy decisions with tool executions, per trace, to
//! measure how much tool use was actually policy-gated.
//!
//! ```rust,ignore
//! let coverage = EnforcementCorrelator::new().correlate(&events);
//! for trace in coverage.uncontrolled_mutations() {
//!     println!("{} mutated without a decision", trace.trace_id);
//! }
//! ```

pub mod correlator;

pub use correlator::{Attribution, CoverageReport, EnforcementCorrelator, TraceSummary};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use warden_contracts::{
        event::{
            DecisionRecord, DecisionSource, DelegationRecord, Event, EventPayload, ExecutionOutcome,
            ExecutionRecord, ReasoningRecord, Resolution,
        },
        policy::VerdictEffect,
        request::{ActionClass, Origin},
    };

    use super::{Attribution, EnforcementCorrelator};

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Wrap payloads in events. Hashes are irrelevant to correlation.
    fn events(payloads: Vec<EventPayload>) -> Vec<Event> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Event {
                seq: i as u64 + 1,
                timestamp: Utc.with_ymd_and_hms(2026, 3, 4, 12, i as u32, 0).unwrap(),
                payload,
                prev_hash: String::new(),
                hash: String::new(),
            })
            .collect()
    }

    fn reasoning(trace: &str) -> EventPayload {
        EventPayload::AgentReasoning(ReasoningRecord {
            trace_id: trace.to_string(),
            agent: "planner".to_string(),
            summary: "inspect table sizes".to_string(),
            details: json!({}),
        })
    }

    fn delegation(trace: &str) -> EventPayload {
        EventPayload::DelegationDecision(DelegationRecord {
            trace_id: trace.to_string(),
            from_agent: "planner".to_string(),
            to_agent: "db-operator".to_string(),
            task: "vacuum".to_string(),
            rationale: String::new(),
        })
    }

    fn decision(trace: &str, origin: Origin, source: DecisionSource) -> EventPayload {
        EventPayload::PolicyDecision(DecisionRecord {
            trace_id: trace.to_string(),
            actor: "db-operator".to_string(),
            role: "sre".to_string(),
            resource_type: "database".to_string(),
            resource_id: "prod-db".to_string(),
            environment: "prod".to_string(),
            action_class: ActionClass::Write,
            origin,
            effect: VerdictEffect::Allow,
            policy_id: Some("P1".to_string()),
            requires_approval: false,
            row_limit: None,
            reasons: vec![],
            source,
        })
    }

    fn execution(trace: &str, action: ActionClass, tool: &str) -> EventPayload {
        EventPayload::ToolExecution(ExecutionRecord {
            trace_id: trace.to_string(),
            actor: "db-operator".to_string(),
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
        })
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    /// N executions and zero decisions: uncontrolled. One decision: controlled.
    #[test]
    fn test_controlled_and_uncontrolled_traces() {
        let window = events(vec![
            execution("t-rogue", ActionClass::Read, "psql"),
            execution("t-rogue", ActionClass::Write, "psql"),
            execution("t-rogue", ActionClass::Read, "kubectl"),
            decision("t-gated", Origin::AgentMediated, DecisionSource::Engine),
            execution("t-gated", ActionClass::Write, "psql"),
        ]);
        let report = EnforcementCorrelator::new().correlate(&window);

        assert_eq!(report.executing_traces, 2);
        assert_eq!(report.controlled_traces, 1);
        assert_eq!(report.uncontrolled_traces, 1);
        assert_eq!(report.total_executions, 4);
        assert_eq!(report.controlled_executions, 1);
        assert_eq!(report.trace_coverage, Some(0.5));
        assert_eq!(report.execution_coverage, Some(0.25));

        let rogue = &report.uncontrolled[0];
        assert_eq!(rogue.trace_id, "t-rogue");
        assert_eq!(rogue.executions, 3);
        assert_eq!(rogue.mutations, 1);
        assert_eq!(rogue.highest_action, Some(ActionClass::Write));
        assert_eq!(rogue.tools.len(), 2);
        assert_eq!(report.uncontrolled_mutations().count(), 1);
    }

    /// Read-only uncontrolled traces are reported but not flagged as mutations.
    #[test]
    fn test_read_only_uncontrolled_is_not_a_mutation() {
        let window = events(vec![execution("t-r", ActionClass::Read, "psql")]);
        let report = EnforcementCorrelator::new().correlate(&window);
        assert_eq!(report.uncontrolled_traces, 1);
        assert_eq!(report.uncontrolled_mutations().count(), 0);
    }

    #[test]
    fn test_attribution_by_origin_and_agent_activity() {
        let window = events(vec![
            reasoning("t-agent"),
            decision("t-agent", Origin::AgentMediated, DecisionSource::Engine),
            delegation("t-delegated"),
            decision("t-delegated", Origin::AgentMediated, DecisionSource::Engine),
            decision("t-human", Origin::Direct, DecisionSource::Engine),
            decision("t-orphan", Origin::AgentMediated, DecisionSource::Engine),
        ]);
        let report = EnforcementCorrelator::new().correlate(&window);

        assert_eq!(report.total_decisions, 4);
        assert_eq!(report.agent_decisions, 2);
        assert_eq!(report.direct_decisions, 1);
        assert_eq!(report.unattributable_decisions, 1);
    }

    /// Approval overrides count as decisions and control a trace, but are not
    /// attributed.
    #[test]
    fn test_approval_decisions_counted_separately() {
        let source = DecisionSource::Approval {
            approval_id: "a-1".to_string(),
            resolver: "alice".to_string(),
            resolution: Resolution::Approved,
        };
        let window = events(vec![
            decision("t-1", Origin::AgentMediated, source),
            execution("t-1", ActionClass::Write, "psql"),
        ]);
        let report = EnforcementCorrelator::new().correlate(&window);

        assert_eq!(report.total_decisions, 1);
        assert_eq!(report.approval_decisions, 1);
        assert_eq!(report.engine_decisions, 0);
        assert_eq!(report.controlled_traces, 1);
    }

    /// Nothing executed: coverage is undefined, not zero.
    #[test]
    fn test_empty_window_has_no_coverage() {
        let report = EnforcementCorrelator::new().correlate(&Vec::<Event>::new());
        assert_eq!(report.total_decisions, 0);
        assert!(report.trace_coverage.is_none());
        assert!(report.execution_coverage.is_none());
    }

    #[test]
    fn test_attribute_rule() {
        assert_eq!(EnforcementCorrelator::attribute(Origin::Direct, 0), Attribution::Direct);
        assert_eq!(EnforcementCorrelator::attribute(Origin::AgentMediated, 3), Attribution::Agent);
        assert_eq!(EnforcementCorrelator::attribute(Origin::AgentMediated, 0), Attribution::Unattributable);
    }
}
