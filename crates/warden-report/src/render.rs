//! Text and JSON renderings of a `ComplianceReport`.
//!
//! The text form is deterministic: same report, same bytes. Maps are
//! `BTreeMap`s and lists arrive pre-sorted.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::report::{ComplianceReport, DecisionCounts, PhaseOutcome, PHASES};

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn pct(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "any".to_string()
    } else {
        items.join(", ")
    }
}

fn header(out: &mut String, index: usize) {
    let _ = writeln!(out, "\n[{}/9] {}", index + 1, PHASES[index]);
}

/// Writes the phase body, or the `UNAVAILABLE` line.
fn phase<T>(out: &mut String, index: usize, outcome: &PhaseOutcome<T>, body: impl FnOnce(&mut String, &T)) {
    header(out, index);
    match outcome {
        PhaseOutcome::Complete(data) => body(out, data),
        PhaseOutcome::Unavailable(reason) => {
            let _ = writeln!(out, "  UNAVAILABLE: {reason}");
        }
    }
}

fn counts_row(out: &mut String, key: &str, c: &DecisionCounts) {
    let _ = writeln!(
        out,
        "  {key:<32} {:>6} {:>6} {:>9} {:>9}",
        c.allow, c.deny, c.requires_approval, c.no_match
    );
}

/// The human-readable report.
pub fn render_text(report: &ComplianceReport) -> String {
    let mut out = String::new();
    let w = &report.window;
    let _ = writeln!(out, "WARDEN compliance report");
    let _ = writeln!(out, "generated {}", ts(&report.generated_at));
    let _ = writeln!(
        out,
        "window    {} .. {} (lookback {}s)",
        ts(&w.start),
        ts(&w.end),
        w.lookback_secs
    );

    phase(&mut out, 0, &report.snapshot, |out, s| {
        let _ = writeln!(out, "  ledger enabled:     {}", if s.ledger_enabled { "yes" } else { "no" });
        let _ = writeln!(out, "  backend:            {}", s.backend);
        let _ = writeln!(out, "  ledger events:      {}", s.ledger_events);
        let chain = match s.chain_valid {
            Some(true) => "valid",
            Some(false) => "INVALID",
            None => "unknown",
        };
        let _ = writeln!(out, "  chain:              {chain}");
        let _ = writeln!(out, "  enabled policies:   {}", opt(s.policies));
        let _ = writeln!(out, "  rules:              {}", opt(s.rules));
        let _ = writeln!(out, "  pending approvals:  {}", opt(s.pending_approvals));
    });

    phase(&mut out, 1, &report.policies, |out, policies| {
        if policies.is_empty() {
            let _ = writeln!(out, "  (no enabled policies)");
        }
        for p in policies {
            let _ = writeln!(out, "  {}  {}", p.id, p.description);
            let _ = writeln!(
                out,
                "    types: {}  envs: {}  roles: {}",
                list(&p.resource_types),
                list(&p.environments),
                list(&p.roles)
            );
            for r in &p.rules {
                let mut line = format!("    {:<12} {}", r.action.as_str(), r.effect.as_str());
                if r.requires_approval {
                    line.push_str(" +approval");
                }
                if let Some(limit) = r.row_limit {
                    let _ = write!(line, " rows<={limit}");
                }
                if let Some(window) = &r.time_window {
                    let _ = write!(line, " window {window}");
                }
                let _ = writeln!(out, "{line}");
            }
        }
    });

    phase(&mut out, 2, &report.event_tally, |out, t| {
        for (kind, n) in &t.by_kind {
            let _ = writeln!(out, "  {kind:<22} {n:>6}");
        }
        let _ = writeln!(out, "  {:<22} {:>6}", "total", t.total);
    });

    phase(&mut out, 3, &report.decisions, |out, m| {
        let _ = writeln!(
            out,
            "  {:<32} {:>6} {:>6} {:>9} {:>9}",
            "resource", "allow", "deny", "approval", "no_match"
        );
        for (resource, counts) in &m.resources {
            counts_row(out, resource, counts);
        }
        counts_row(out, "total", &m.totals);
        let _ = writeln!(out, "  approval overrides: {}", m.approval_overrides);
        if m.denied.is_empty() {
            let _ = writeln!(out, "  Blocked requests: none");
        } else {
            let _ = writeln!(out, "  Blocked requests:");
            for d in &m.denied {
                let _ = writeln!(
                    out,
                    "    - seq {} {} actor={} action={} resource={} env={} trace={} policy={} by={}: {}",
                    d.seq,
                    ts(&d.timestamp),
                    d.actor,
                    d.action.as_str(),
                    d.resource,
                    d.environment,
                    d.trace_id,
                    d.policy_id.as_deref().unwrap_or("-"),
                    d.denied_by(),
                    d.message
                );
            }
        }
    });

    phase(&mut out, 4, &report.coverage, |out, c| {
        let _ = writeln!(
            out,
            "  decisions: {} (engine {}, approval {})",
            c.total_decisions, c.engine_decisions, c.approval_decisions
        );
        let _ = writeln!(
            out,
            "  attribution: agent {}, direct {}, unattributable {}",
            c.agent_decisions, c.direct_decisions, c.unattributable_decisions
        );
        let _ = writeln!(
            out,
            "  executions: {} ({} in controlled traces)",
            c.total_executions, c.controlled_executions
        );
        let _ = writeln!(
            out,
            "  traces: {} executing, {} controlled, {} uncontrolled",
            c.executing_traces, c.controlled_traces, c.uncontrolled_traces
        );
        let _ = writeln!(
            out,
            "  coverage: traces {}, executions {}",
            pct(c.trace_coverage),
            pct(c.execution_coverage)
        );
        for t in &c.uncontrolled {
            let tools: Vec<&str> = t.tools.iter().map(String::as_str).collect();
            let _ = writeln!(
                out,
                "    uncontrolled {} executions={} mutations={} highest={} tools={}",
                t.trace_id,
                t.executions,
                t.mutations,
                t.highest_action.map(|a| a.as_str()).unwrap_or("-"),
                tools.join(",")
            );
        }
    });

    phase(&mut out, 5, &report.approvals, |out, rows| {
        if rows.is_empty() {
            let _ = writeln!(out, "  none");
        }
        for r in rows {
            let _ = writeln!(
                out,
                "  {} created {} age {}s actor={} action={} resource={} trace={} policy={}{}",
                r.id,
                ts(&r.created_at),
                r.age_secs,
                r.actor,
                r.action.as_str(),
                r.resource,
                r.trace_id,
                r.policy_id.as_deref().unwrap_or("-"),
                if r.overdue { " OVERDUE" } else { "" }
            );
        }
    });

    phase(&mut out, 6, &report.integrity, |out, r| {
        if r.valid {
            let _ = writeln!(out, "  chain valid: {} event(s)", r.total);
        } else {
            let _ = writeln!(
                out,
                "  CHAIN INVALID at seq {}: {}",
                opt(r.first_invalid),
                r.reason.as_deref().unwrap_or("unknown")
            );
            let _ = writeln!(out, "  events verified before failure: {}", r.total);
        }
        if let Some(head) = &r.head_hash {
            let _ = writeln!(out, "  head hash: {head}");
        }
    });

    phase(&mut out, 7, &report.mutations, |out, m| {
        let _ = writeln!(out, "  write/destructive executions: {} (prior window {})", m.total, m.prior_total);
        for (label, rows) in [("by tool", &m.by_tool), ("by actor", &m.by_actor)] {
            let _ = writeln!(out, "  {label}:");
            for d in rows.iter() {
                let _ = writeln!(out, "    {:<24} {:>5} (prior {:>5}, {:+})", d.key, d.current, d.prior, d.delta);
            }
        }
        let _ = writeln!(out, "  by hour ({}):", m.utc_offset);
        let busy: Vec<String> = m
            .by_hour
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(h, n)| format!("{h:02}h={n}"))
            .collect();
        let _ = writeln!(out, "    {}", if busy.is_empty() { "none".to_string() } else { busy.join(" ") });
    });

    header(&mut out, 8);
    let s = &report.status;
    let _ = writeln!(out, "  STATUS: {} (exit {})", s.status, s.exit_code);
    for line in &s.alerts {
        let _ = writeln!(out, "  ALERT: {line}");
    }
    for line in &s.degraded {
        let _ = writeln!(out, "  DEGRADED: {line}");
    }
    out
}

/// The machine-readable report.
pub fn render_json(report: &ComplianceReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}
