//! Subcommand bodies. Each returns the process exit code.

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{SecondsFormat, Utc};
use tracing::{error, info};

use warden_approval::{ApprovalConfig, ApprovalManager};
use warden_audit::{ChainReport, Ledger, VerifyOptions};
use warden_contracts::{
    approval::{ApprovalDecision, ApprovalId, PendingApproval},
    error::{LedgerError, WardenError, WardenResult},
    request::{Actor, RequestContext, Resource},
};
use warden_core::traits::{DecisionEngine, EventStore, PendingApprovalSource};
use warden_policy::{PolicyDecisionEngine, PolicyStore};
use warden_report::{
    render_json, render_text, ComplianceReporter, GatewayClient, ReportOptions, ReportPublisher,
    ReporterConfig, RetryPolicy,
};
use warden_store_sqlite::{SqliteApprovalStore, SqliteEventStore};

use crate::{ApprovalCommand, EvaluateArgs, ReportArgs, ResolveArgs, SourceArgs, VerifyArgs};

// ── Sources ───────────────────────────────────────────────────────────────────

struct Sources {
    events: Arc<dyn EventStore>,
    approvals: Arc<dyn PendingApprovalSource>,
}

/// Report and verify only read: a ledger file is opened read-only, so a
/// mistyped path fails instead of auditing a fresh empty database.
fn open_sources(ledger_db: Option<&Path>, gateway_url: Option<&str>) -> WardenResult<Sources> {
    match (ledger_db, gateway_url) {
        (Some(path), None) => Ok(Sources {
            events: Arc::new(SqliteEventStore::open_read_only(path)?),
            approvals: Arc::new(SqliteApprovalStore::open_read_only(path)?),
        }),
        (None, Some(url)) => {
            let client = Arc::new(GatewayClient::new(url)?);
            Ok(Sources {
                events: client.clone(),
                approvals: client,
            })
        }
        (Some(_), Some(_)) => Err(WardenError::Config {
            reason: "ledger_db and gateway_url are mutually exclusive".to_string(),
        }),
        (None, None) => Err(WardenError::Config {
            reason: "no ledger source; pass --ledger-db or --gateway-url".to_string(),
        }),
    }
}

impl SourceArgs {
    /// A flag replaces whatever source the config file named.
    fn apply(&self, config: &mut ReporterConfig) {
        if let Some(path) = &self.ledger_db {
            config.ledger_db = Some(path.clone());
            config.gateway_url = None;
        }
        if let Some(url) = &self.gateway_url {
            config.gateway_url = Some(url.clone());
            config.ledger_db = None;
        }
    }
}

// ── report ────────────────────────────────────────────────────────────────────

pub fn report(args: ReportArgs) -> WardenResult<i32> {
    let mut config = match &args.config {
        Some(path) => ReporterConfig::from_file(path)?,
        None => ReporterConfig::default(),
    };
    args.source.apply(&mut config);
    if let Some(path) = args.policies {
        config.policies = Some(path);
    }
    if let Some(lookback) = args.lookback {
        config.lookback = lookback;
    }
    if let Some(url) = args.webhook {
        config.webhook_url = Some(url);
    }

    let options = ReportOptions::from_config(&config)?;
    let sources = open_sources(config.ledger_db.as_deref(), config.gateway_url.as_deref())?;

    // A policy file that fails to load is fatal, not a degraded phase.
    let mut reporter = ComplianceReporter::new(sources.events, options).with_approvals(sources.approvals);
    if let Some(path) = &config.policies {
        reporter = reporter.with_policies(Arc::new(PolicyStore::from_file(path)?));
    }

    let report = reporter.run();

    if args.json {
        let json = render_json(&report).map_err(|e| WardenError::Config {
            reason: format!("cannot serialize report: {e}"),
        })?;
        println!("{json}");
    } else {
        print!("{}", render_text(&report));
    }

    if let Some(url) = &config.webhook_url {
        // Publishing is best-effort; the exit code reflects the report.
        if let Err(e) = ReportPublisher::new(url).and_then(|p| p.publish(&report, args.dry_run)) {
            error!(url = %url, error = %e, "report not published");
        }
    }

    Ok(report.exit_code())
}

// ── verify ────────────────────────────────────────────────────────────────────

pub fn verify(args: VerifyArgs) -> WardenResult<i32> {
    let sources = open_sources(args.source.ledger_db.as_deref(), args.source.gateway_url.as_deref())?;
    let ledger = RetryPolicy::default().run("open ledger", || Ledger::open(Arc::clone(&sources.events)))?;
    let options = VerifyOptions {
        deadline: args.timeout_secs.map(|s| Instant::now() + Duration::from_secs(s)),
        cancel: None,
    };

    match ledger.verify_with(&options).and_then(ChainReport::into_result) {
        Ok(report) => {
            println!("chain valid: {} event(s) in {}", report.total, ledger.backend());
            if let Some(head) = &report.head_hash {
                println!("head hash: {head}");
            }
            Ok(0)
        }
        Err(LedgerError::ChainIntegrity { seq, reason }) => {
            println!("CHAIN INVALID at seq {seq}: {reason}");
            println!("events verified before failure: {}", seq.saturating_sub(1));
            Ok(3)
        }
        Err(e) => {
            eprintln!("warden: verification did not complete: {e}");
            Ok(1)
        }
    }
}

// ── evaluate ──────────────────────────────────────────────────────────────────

pub fn evaluate(args: EvaluateArgs) -> WardenResult<i32> {
    let store = Arc::new(PolicyStore::from_file(&args.policies)?);
    let engine = PolicyDecisionEngine::new(store);
    let at = args.at.unwrap_or_else(Utc::now);

    let ctx = RequestContext {
        actor: Actor { id: args.actor, role: args.role },
        resource: Resource {
            resource_type: args.resource_type,
            id: args.resource_id,
            environment: args.env,
        },
        action_class: args.action.into(),
        timestamp: at,
        trace_id: args.trace,
        origin: args.origin.into(),
    };
    let verdict = engine.evaluate_at(&ctx, at);

    if args.json {
        let json = serde_json::to_string_pretty(&verdict).map_err(|e| WardenError::Config {
            reason: format!("cannot serialize verdict: {e}"),
        })?;
        println!("{json}");
        return Ok(0);
    }

    println!("verdict:           {}", verdict.effect.as_str());
    println!("policy:            {}", verdict.policy_id.as_deref().unwrap_or("-"));
    println!("matched:           {}", verdict.matched_policies.join(", "));
    println!("requires approval: {}", if verdict.requires_approval { "yes" } else { "no" });
    println!(
        "row limit:         {}",
        verdict.row_limit.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string())
    );
    for reason in &verdict.reasons {
        println!("  - {reason}");
    }
    Ok(0)
}

// ── approvals ─────────────────────────────────────────────────────────────────

const DEFAULT_TTL: Duration = Duration::from_secs(3_600);

fn manager(path: &Path, ttl: Duration) -> WardenResult<ApprovalManager> {
    let ledger = Ledger::open(Arc::new(SqliteEventStore::open(path)?))?;
    let ttl = chrono::Duration::from_std(ttl).map_err(|_| WardenError::Config {
        reason: "ttl is too large".to_string(),
    })?;
    Ok(ApprovalManager::new(
        Arc::new(SqliteApprovalStore::open(path)?),
        Arc::new(ledger),
        ApprovalConfig { ttl, ..ApprovalConfig::default() },
    ))
}

fn print_approval(a: &PendingApproval) {
    let ctx = &a.context;
    println!(
        "{} {} created {} actor={} action={} resource={} env={} trace={} policy={}",
        a.id,
        a.status.as_str(),
        a.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ctx.actor.id,
        ctx.action_class,
        ctx.resource.key(),
        ctx.resource.environment,
        ctx.trace_id,
        a.verdict.policy_id.as_deref().unwrap_or("-")
    );
}

fn resolve(args: ResolveArgs, decision: ApprovalDecision) -> WardenResult<()> {
    let resolved = manager(&args.db.ledger_db, DEFAULT_TTL)?.resolve(
        &ApprovalId(args.id),
        decision,
        &args.resolver,
        args.note,
    )?;
    print_approval(&resolved);
    Ok(())
}

pub fn approvals(command: ApprovalCommand) -> WardenResult<i32> {
    match command {
        ApprovalCommand::List { db, all } => {
            let manager = manager(&db.ledger_db, DEFAULT_TTL)?;
            let list = if all { manager.list_all()? } else { manager.list_pending()? };
            if list.is_empty() {
                println!("no approvals");
            }
            list.iter().for_each(print_approval);
        }
        ApprovalCommand::Approve(args) => resolve(args, ApprovalDecision::Approve)?,
        ApprovalCommand::Reject(args) => resolve(args, ApprovalDecision::Reject)?,
        ApprovalCommand::Expire { db, id, ttl } => {
            let manager = manager(&db.ledger_db, ttl)?;
            match id {
                Some(id) => print_approval(&manager.expire(&ApprovalId(id), Utc::now())?),
                None => {
                    let expired = manager.expire_stale(Utc::now())?;
                    info!(count = expired.len(), "stale approvals expired");
                    println!("expired {} approval(s)", expired.len());
                    expired.iter().for_each(print_approval);
                }
            }
        }
    }
    Ok(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
