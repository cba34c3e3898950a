//! Trace-level correlation of decisions and executions.
//!
//! A trace that executed at least one tool is *controlled* when the same
//! trace also carries a `policy_decision` in the window, otherwise
//! *uncontrolled*. Origin comes from the recorded request metadata only; the
//! correlator never guesses it from payload text.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use warden_contracts::{
    event::{Event, EventPayload},
    request::{ActionClass, Origin},
};

/// Who an engine decision is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    /// Agent-mediated, and the trace shows agent reasoning or delegation.
    Agent,
    /// A human or service called the gateway directly.
    Direct,
    /// Claims agent mediation, but no agent activity resolves for its trace.
    Unattributable,
}

/// Everything the window shows about one trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub decisions: usize,
    pub executions: usize,
    /// Write and destructive executions.
    pub mutations: usize,
    /// Reasoning plus delegation events.
    pub agent_activity: usize,
    pub highest_action: Option<ActionClass>,
    pub tools: BTreeSet<String>,
    pub actors: BTreeSet<String>,
}

impl TraceSummary {
    /// True once the trace executed something.
    pub fn executed(&self) -> bool {
        self.executions > 0
    }

    /// Executed with at least one decision on record.
    pub fn controlled(&self) -> bool {
        self.executed() && self.decisions > 0
    }

    /// Executed with no decision on record.
    pub fn uncontrolled(&self) -> bool {
        self.executed() && self.decisions == 0
    }
}

/// Enforcement coverage for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Every `policy_decision` in the window.
    pub total_decisions: usize,
    /// Decisions made by the engine.
    pub engine_decisions: usize,
    /// Decisions recorded by approval resolution or expiry.
    pub approval_decisions: usize,
    pub agent_decisions: usize,
    pub direct_decisions: usize,
    pub unattributable_decisions: usize,

    pub total_executions: usize,
    pub controlled_executions: usize,
    pub executing_traces: usize,
    pub controlled_traces: usize,
    pub uncontrolled_traces: usize,

    /// controlled_traces / executing_traces; `None` when nothing executed.
    pub trace_coverage: Option<f64>,
    /// controlled_executions / total_executions; `None` when nothing executed.
    pub execution_coverage: Option<f64>,

    /// Uncontrolled traces, ordered by trace id.
    pub uncontrolled: Vec<TraceSummary>,
}

impl CoverageReport {
    /// Uncontrolled traces that ran a write or destructive tool.
    pub fn uncontrolled_mutations(&self) -> impl Iterator<Item = &TraceSummary> {
        self.uncontrolled.iter().filter(|t| t.mutations > 0)
    }
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

/// Stateless correlator over a window of events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnforcementCorrelator;

impl EnforcementCorrelator {
    pub fn new() -> Self {
        Self
    }

    /// Group `events` by trace and summarize each.
    pub fn traces<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> BTreeMap<String, TraceSummary> {
        let mut traces: BTreeMap<String, TraceSummary> = BTreeMap::new();
        for event in events {
            let trace_id = event.payload.trace_id();
            let summary = traces.entry(trace_id.to_string()).or_insert_with(|| TraceSummary {
                trace_id: trace_id.to_string(),
                ..TraceSummary::default()
            });

            match &event.payload {
                EventPayload::AgentReasoning(r) => {
                    summary.agent_activity += 1;
                    summary.actors.insert(r.agent.clone());
                }
                EventPayload::DelegationDecision(d) => {
                    summary.agent_activity += 1;
                    summary.actors.insert(d.from_agent.clone());
                }
                EventPayload::PolicyDecision(d) => {
                    summary.decisions += 1;
                    summary.actors.insert(d.actor.clone());
                }
                EventPayload::ToolExecution(e) => {
                    summary.executions += 1;
                    if e.action_class.is_mutation() {
                        summary.mutations += 1;
                    }
                    summary.highest_action = summary.highest_action.max(Some(e.action_class));
                    summary.tools.insert(e.tool.clone());
                    summary.actors.insert(e.actor.clone());
                }
            }
        }
        traces
    }

    /// How an engine decision on `origin` in a trace with `agent_activity`
    /// events is attributed.
    pub fn attribute(origin: Origin, agent_activity: usize) -> Attribution {
        match origin {
            Origin::Direct => Attribution::Direct,
            Origin::AgentMediated if agent_activity > 0 => Attribution::Agent,
            Origin::AgentMediated => Attribution::Unattributable,
        }
    }

    /// Correlate one window of events.
    pub fn correlate<'a>(&self, events: impl IntoIterator<Item = &'a Event> + Clone) -> CoverageReport {
        let traces = self.traces(events.clone());
        let mut report = CoverageReport::default();

        for event in events {
            let EventPayload::PolicyDecision(d) = &event.payload else {
                continue;
            };
            report.total_decisions += 1;
            if !d.is_engine() {
                report.approval_decisions += 1;
                continue;
            }
            report.engine_decisions += 1;
            let activity = traces.get(&d.trace_id).map_or(0, |t| t.agent_activity);
            match Self::attribute(d.origin, activity) {
                Attribution::Agent => report.agent_decisions += 1,
                Attribution::Direct => report.direct_decisions += 1,
                Attribution::Unattributable => report.unattributable_decisions += 1,
            }
        }

        for trace in traces.values().filter(|t| t.executed()) {
            report.executing_traces += 1;
            report.total_executions += trace.executions;
            if trace.controlled() {
                report.controlled_traces += 1;
                report.controlled_executions += trace.executions;
            } else {
                report.uncontrolled_traces += 1;
                if trace.mutations > 0 {
                    warn!(
                        trace_id = %trace.trace_id,
                        mutations = trace.mutations,
                        "uncontrolled trace mutated infrastructure"
                    );
                }
                report.uncontrolled.push(trace.clone());
            }
        }

        report.trace_coverage = ratio(report.controlled_traces, report.executing_traces);
        report.execution_coverage = ratio(report.controlled_executions, report.total_executions);

        debug!(
            traces = traces.len(),
            decisions = report.total_decisions,
            executions = report.total_executions,
            uncontrolled = report.uncontrolled_traces,
            "window correlated"
        );
        report
    }
}
