//! The compliance reporter: nine read-only phases over one window.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::{info, warn};

use warden_audit::{Ledger, VerifyOptions, DEFAULT_PAGE_SIZE};
use warden_contracts::{
    error::{LedgerError, WardenError},
    event::Event,
};
use warden_core::traits::{EventStore, PendingApprovalSource};
use warden_correlate::EnforcementCorrelator;
use warden_policy::PolicyStore;

use crate::{
    config::ReporterConfig,
    phases,
    report::{ComplianceReport, GovernanceSnapshot, PhaseOutcome, ReportWindow, PHASES},
    retry::RetryPolicy,
    status::StatusBuilder,
};

/// Resolved reporter settings.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub lookback: chrono::Duration,
    pub utc_offset: FixedOffset,
    pub approval_ttl: chrono::Duration,
    pub retry: RetryPolicy,
    pub verify_timeout: Option<Duration>,
    pub page_size: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::hours(24),
            utc_offset: Utc.fix(),
            approval_ttl: chrono::Duration::hours(1),
            retry: RetryPolicy::default(),
            verify_timeout: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ReportOptions {
    pub fn from_config(config: &ReporterConfig) -> Result<Self, WardenError> {
        config.validate()?;
        let to_chrono = |d: Duration, field: &str| {
            chrono::Duration::from_std(d).map_err(|_| WardenError::Config {
                reason: format!("{field} is too large"),
            })
        };
        Ok(Self {
            lookback: to_chrono(config.lookback, "lookback")?,
            utc_offset: config.utc_offset()?,
            approval_ttl: to_chrono(config.approval_ttl, "approval_ttl")?,
            retry: config.retry,
            verify_timeout: config.verify_timeout,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }
}

/// Runs the phases against whatever sources it was given.
///
/// Holds no state between runs and never writes: running it twice over an
/// unchanged ledger yields the same report.
pub struct ComplianceReporter {
    events: Arc<dyn EventStore>,
    approvals: Option<Arc<dyn PendingApprovalSource>>,
    policies: Option<Arc<PolicyStore>>,
    options: ReportOptions,
}

impl ComplianceReporter {
    pub fn new(events: Arc<dyn EventStore>, options: ReportOptions) -> Self {
        Self {
            events,
            approvals: None,
            policies: None,
            options,
        }
    }

    pub fn with_approvals(mut self, approvals: Arc<dyn PendingApprovalSource>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_policies(mut self, policies: Arc<PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    /// Report on the window ending now.
    pub fn run(&self) -> ComplianceReport {
        self.run_at(Utc::now())
    }

    /// Report on the window ending at `now`.
    pub fn run_at(&self, now: DateTime<Utc>) -> ComplianceReport {
        let window = ReportWindow::ending_at(now, self.options.lookback);
        let retry = &self.options.retry;
        info!(
            backend = %self.events.backend(),
            start = %window.start,
            end = %window.end,
            "compliance report started"
        );

        let ledger = retry
            .run("open ledger", || Ledger::open(Arc::clone(&self.events)))
            .map(|l| l.with_page_size(self.options.page_size));
        let ledger = PhaseOutcome::from_result(ledger);

        let current = self.scan(&ledger, window.start, |ts| *ts <= window.end);
        let prior = self.scan(&ledger, window.prior_start, |ts| *ts < window.start);

        // 2
        let policies = match &self.policies {
            Some(store) => PhaseOutcome::Complete(phases::policy_overview(store)),
            None => PhaseOutcome::Unavailable("no policy file configured".to_string()),
        };

        // 3, 4, 5
        let event_tally = current.as_ref().map(|events| phases::event_tally(events));
        let decisions = current.as_ref().map(|events| phases::decision_matrix(events));
        let coverage = current
            .as_ref()
            .map(|events| EnforcementCorrelator::new().correlate(events.iter()));

        // 6
        let pending = match &self.approvals {
            Some(source) => PhaseOutcome::from_result(retry.run("list pending approvals", || source.pending())),
            None => PhaseOutcome::Unavailable("no approval store configured".to_string()),
        };
        let approvals = match &pending {
            PhaseOutcome::Complete(list) => {
                PhaseOutcome::Complete(phases::pending_rows(list, now, self.options.approval_ttl))
            }
            PhaseOutcome::Unavailable(reason) => PhaseOutcome::Unavailable(reason.clone()),
        };

        // 7
        let integrity = match ledger.complete() {
            Some(l) => PhaseOutcome::from_result(self.verify(l)),
            None => unavailable_like(&ledger),
        };

        // 8
        let mutations = match (current.complete(), prior.complete()) {
            (Some(cur), Some(pri)) => {
                PhaseOutcome::Complete(phases::mutation_activity(cur, pri, self.options.utc_offset))
            }
            _ => PhaseOutcome::Unavailable(
                current
                    .unavailable_reason()
                    .or(prior.unavailable_reason())
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
            ),
        };

        // 1
        let snapshot = match ledger.complete() {
            Some(l) => PhaseOutcome::from_result(retry.run("count events", || l.count()).map(|n| GovernanceSnapshot {
                ledger_enabled: true,
                backend: l.backend(),
                ledger_events: n,
                chain_valid: integrity.complete().map(|r| r.valid),
                policies: self.policies.as_ref().map(|p| p.enabled().count()),
                rules: self.policies.as_ref().map(|p| p.rule_count()),
                pending_approvals: pending.complete().map(Vec::len),
            })),
            None => unavailable_like(&ledger),
        };

        // 9
        let mut status = StatusBuilder::new();
        let unavailable = [
            snapshot.unavailable_reason(),
            policies.unavailable_reason(),
            event_tally.unavailable_reason(),
            decisions.unavailable_reason(),
            coverage.unavailable_reason(),
            approvals.unavailable_reason(),
            integrity.unavailable_reason(),
            mutations.unavailable_reason(),
        ];
        for (title, reason) in PHASES.iter().zip(unavailable) {
            if let Some(reason) = reason {
                warn!(phase = *title, reason, "report phase unavailable");
                status.degraded(format!("{title}: {reason}"));
            }
        }
        if let Some(report) = integrity.complete().filter(|r| !r.valid) {
            status.chain_invalid(format!(
                "ledger chain invalid at seq {}: {}",
                report.first_invalid.unwrap_or(0),
                report.reason.as_deref().unwrap_or("unknown")
            ));
        }
        if let Some(matrix) = decisions.complete() {
            let by_policy = matrix.denied.iter().filter(|d| d.resolution.is_none()).count();
            let by_approval = matrix.denied.len() - by_policy;
            if by_policy > 0 {
                status.alert(format!("{by_policy} request(s) denied by policy in window"));
            }
            if by_approval > 0 {
                status.alert(format!("{by_approval} request(s) denied by approval rejection or expiry in window"));
            }
        }
        if let Some(cov) = coverage.complete() {
            let traces: Vec<&str> = cov.uncontrolled_mutations().map(|t| t.trace_id.as_str()).collect();
            if !traces.is_empty() {
                status.alert(format!(
                    "{} uncontrolled trace(s) ran write/destructive tools: {}",
                    traces.len(),
                    traces.join(", ")
                ));
            }
        }
        let status = status.finish();

        info!(status = %status.status, alerts = status.alerts.len(), "compliance report finished");

        ComplianceReport {
            generated_at: now,
            window,
            snapshot,
            policies,
            event_tally,
            decisions,
            coverage,
            approvals,
            integrity,
            mutations,
            status,
        }
    }

    /// Events from `since` on for which `keep` holds, with retries.
    fn scan(
        &self,
        ledger: &PhaseOutcome<Ledger>,
        since: DateTime<Utc>,
        keep: impl Fn(&DateTime<Utc>) -> bool,
    ) -> PhaseOutcome<Vec<Event>> {
        let Some(ledger) = ledger.complete() else {
            return unavailable_like(ledger);
        };
        let query = ledger.query(since, None);
        PhaseOutcome::from_result(self.options.retry.run("scan window", || {
            query
                .iter()
                .filter(|r| r.as_ref().map_or(true, |e| keep(&e.timestamp)))
                .collect::<Result<Vec<Event>, LedgerError>>()
        }))
    }

    fn verify(&self, ledger: &Ledger) -> Result<warden_audit::ChainReport, LedgerError> {
        let options = VerifyOptions {
            deadline: self.options.verify_timeout.map(|t| Instant::now() + t),
            cancel: None,
        };
        self.options.retry.run("verify chain", || ledger.verify_with(&options))
    }
}

fn unavailable_like<T, U>(outcome: &PhaseOutcome<U>) -> PhaseOutcome<T> {
    PhaseOutcome::Unavailable(outcome.unavailable_reason().unwrap_or_default().to_string())
}
