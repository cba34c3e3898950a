//! The WARDEN gateway: the policy-bound tool invocation runner.
//!
//! The gateway enforces the governance pipeline for every tool call:
//!
//!   Request → Decision → Ledger → [Approval] → [ToolRunner::run] → Ledger
//!
//! The security invariant is absolute: `ToolRunner::run()` is NEVER called
//! unless the decision engine returned an allow verdict that does not require
//! approval (or the request was later approved) AND that decision was
//! appended to the ledger. The code path to `run()` is only reachable after
//! both hold.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use tracing::{debug, info, warn};

use warden_contracts::{
    approval::{ApprovalId, ApprovalStatus, PendingApproval},
    error::{WardenError, WardenResult},
    event::{DecisionRecord, Event, EventPayload, ExecutionOutcome, ExecutionRecord},
    policy::{Verdict, VerdictEffect},
};

use crate::traits::{ApprovalQueue, AuditSink, DecisionEngine, ToolInvocation, ToolReport, ToolRunner};

/// The outcome of one gateway invocation.
///
/// Callers pattern-match on this:
/// - `Executed` → the tool ran; both events are on record
/// - `Denied` / `NoMatch` → nothing ran; the decision is on record
/// - `AwaitingApproval` → nothing ran yet; resolve the approval, then call
///   `Gateway::execute_approved`
#[derive(Debug)]
pub enum InvocationResult {
    /// The tool ran successfully.
    Executed {
        verdict: Verdict,
        decision: Event,
        execution: Event,
        report: ToolReport,
    },

    /// A policy denied the request.
    Denied { verdict: Verdict, decision: Event },

    /// No enabled policy covered the request. The gateway does not run
    /// uncovered requests.
    NoMatch { verdict: Verdict, decision: Event },

    /// The request is parked until a human resolves it.
    AwaitingApproval {
        verdict: Verdict,
        decision: Event,
        approval: PendingApproval,
    },
}

/// Wires the decision engine, the ledger, the approval queue, and a tool
/// runner together in trust order.
pub struct Gateway {
    engine: Box<dyn DecisionEngine>,
    audit: Arc<dyn AuditSink>,
    approvals: Arc<dyn ApprovalQueue>,
    runner: Box<dyn ToolRunner>,
    /// Approvals already handed to the runner.
    executed: Mutex<HashSet<ApprovalId>>,
}

impl Gateway {
    /// Create a gateway from its trusted components and a tool runner.
    pub fn new(
        engine: Box<dyn DecisionEngine>,
        audit: Arc<dyn AuditSink>,
        approvals: Arc<dyn ApprovalQueue>,
        runner: Box<dyn ToolRunner>,
    ) -> Self {
        Self {
            engine,
            audit,
            approvals,
            runner,
            executed: Mutex::new(HashSet::new()),
        }
    }

    /// Evaluate, record, and (if permitted) execute one invocation.
    ///
    /// # Pipeline
    ///
    /// 1. `engine.evaluate()` on the request context
    /// 2. Append a `policy_decision` event; a failed append aborts the call
    /// 3. Deny / no match → return without running anything
    /// 4. Allow + requires approval → submit to the approval queue, return
    /// 5. Allow → `runner.run()` with the verdict's row limit
    /// 6. Append a `tool_execution` event (success or failure)
    ///
    /// # Errors
    ///
    /// Returns `Err` for ledger, approval, and tool failures. Deny, no match,
    /// and awaiting approval are NOT errors.
    pub fn invoke(&self, invocation: ToolInvocation) -> WardenResult<InvocationResult> {
        let ctx = &invocation.context;

        debug!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor.id,
            resource = %ctx.resource.key(),
            action = %ctx.action_class,
            tool = %invocation.tool,
            "gateway invocation starting"
        );

        // ── Step 1: Decision ─────────────────────────────────────────────────
        let verdict = self.engine.evaluate(ctx);

        // ── Step 2: Record the decision before anything else happens ─────────
        let decision = self
            .audit
            .record(EventPayload::PolicyDecision(DecisionRecord::from_verdict(ctx, &verdict)))?;

        // ── Step 3/4: Non-executing verdicts ─────────────────────────────────
        match verdict.effect {
            VerdictEffect::Deny => {
                warn!(
                    trace_id = %ctx.trace_id,
                    policy_id = ?verdict.policy_id,
                    resource = %ctx.resource.key(),
                    "request denied by policy"
                );
                return Ok(InvocationResult::Denied { verdict, decision });
            }
            VerdictEffect::NoMatch => {
                warn!(
                    trace_id = %ctx.trace_id,
                    resource = %ctx.resource.key(),
                    action = %ctx.action_class,
                    "no policy covers request; not executing"
                );
                return Ok(InvocationResult::NoMatch { verdict, decision });
            }
            VerdictEffect::Allow if verdict.requires_approval => {
                let approval = self.approvals.submit(&verdict, ctx)?;
                info!(
                    trace_id = %ctx.trace_id,
                    approval_id = %approval.id,
                    "request parked awaiting approval"
                );
                return Ok(InvocationResult::AwaitingApproval { verdict, decision, approval });
            }
            VerdictEffect::Allow => {}
        }

        // ── Step 5/6: Execute and record ─────────────────────────────────────
        let (execution, report) = self.run_and_record(&invocation, verdict.row_limit)?;
        Ok(InvocationResult::Executed { verdict, decision, execution, report })
    }

    /// Run an invocation whose approval has been granted.
    ///
    /// The approval's own `policy_decision` event was appended when it was
    /// resolved, so only the execution is recorded here.
    ///
    /// An approval is single-use: once this gateway has handed it to the
    /// runner, later calls with the same id fail, even if the first run
    /// failed. Running the request again needs a fresh approval.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Config` if the approval is not `Approved`, does
    /// not describe `invocation`, or was already executed, plus any ledger or
    /// tool failure.
    pub fn execute_approved(
        &self,
        approval: &PendingApproval,
        invocation: &ToolInvocation,
    ) -> WardenResult<(Event, ToolReport)> {
        if approval.status != ApprovalStatus::Approved {
            return Err(WardenError::Config {
                reason: format!(
                    "approval '{}' is {}, not approved",
                    approval.id,
                    approval.status.as_str()
                ),
            });
        }
        if !approval.same_request(&invocation.context) {
            return Err(WardenError::Config {
                reason: format!("approval '{}' does not cover this invocation", approval.id),
            });
        }

        let first_use = self
            .executed
            .lock()
            .map_err(|e| WardenError::Config {
                reason: format!("approval registry lock poisoned: {e}"),
            })?
            .insert(approval.id.clone());
        if !first_use {
            warn!(approval_id = %approval.id, trace_id = %invocation.context.trace_id, "approval reuse refused");
            return Err(WardenError::Config {
                reason: format!("approval '{}' was already executed", approval.id),
            });
        }
        self.run_and_record(invocation, approval.verdict.row_limit)
    }

    fn run_and_record(
        &self,
        invocation: &ToolInvocation,
        row_limit: Option<u64>,
    ) -> WardenResult<(Event, ToolReport)> {
        let ctx = &invocation.context;
        let started = Utc::now();
        let result = self.runner.run(invocation, row_limit);

        let (outcome, report) = match &result {
            Ok(report) => (ExecutionOutcome::Success, report.clone()),
            Err(_) => {
                let elapsed = (Utc::now() - started).num_milliseconds().max(0);
                (
                    ExecutionOutcome::Failure,
                    ToolReport { rows_affected: None, duration_ms: elapsed.unsigned_abs() },
                )
            }
        };

        let execution = self.audit.record(EventPayload::ToolExecution(ExecutionRecord {
            trace_id: ctx.trace_id.clone(),
            actor: ctx.actor.id.clone(),
            resource_type: ctx.resource.resource_type.clone(),
            resource_id: ctx.resource.id.clone(),
            environment: ctx.resource.environment.clone(),
            action_class: ctx.action_class,
            origin: ctx.origin,
            tool: invocation.tool.clone(),
            command: invocation.command.clone(),
            outcome,
            rows_affected: report.rows_affected,
            duration_ms: report.duration_ms,
        }))?;

        match result {
            Ok(report) => Ok((execution, report)),
            Err(e) => {
                warn!(
                    trace_id = %ctx.trace_id,
                    tool = %invocation.tool,
                    error = %e,
                    "tool execution failed"
                );
                Err(WardenError::ToolFailed {
                    tool: invocation.tool.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
