//! The approval lifecycle.
//!
//! ```text
//!   create_from_verdict ──► Pending ──resolve──► Approved | Rejected
//!                              │
//!                              └──expire (ttl)──► Expired
//! ```
//!
//! Every transition out of `Pending` is a compare-and-set on the store, so
//! concurrent resolvers race safely: exactly one wins, the rest get
//! `AlreadyResolved`. Each successful transition is recorded in the ledger as
//! an approval-sourced `policy_decision`. If that append fails the record is
//! reopened, so a status never leaves `Pending` without a ledger event and
//! the caller can retry.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use warden_contracts::{
    approval::{ApprovalDecision, ApprovalId, ApprovalStatus, NotificationKind, PendingApproval},
    error::{ApprovalError, StoreError},
    event::{DecisionRecord, DecisionSource, Event, EventPayload, Resolution},
    policy::{Verdict, VerdictEffect},
    request::RequestContext,
};
use warden_core::traits::{
    ApprovalQueue, ApprovalStore, AuditSink, CasOutcome, InsertOutcome, Notifier, PendingApprovalSource,
    StatusUpdate,
};

/// Resolver recorded when the TTL expires a request.
pub const TTL_RESOLVER: &str = "system:ttl";

/// Lifecycle timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalConfig {
    /// Identical in-flight requests created within this window collapse into
    /// one record.
    pub dedup_window: Duration,
    /// Pending records older than this may be expired.
    pub ttl: Duration,
    /// Terminal records resolved longer ago than this may be purged.
    pub retention: Duration,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::seconds(120),
            ttl: Duration::hours(1),
            retention: Duration::days(30),
        }
    }
}

/// Tracks approval-required verdicts through to resolution.
pub struct ApprovalManager {
    store: Arc<dyn ApprovalStore>,
    audit: Arc<dyn AuditSink>,
    notifiers: Vec<Box<dyn Notifier>>,
    config: ApprovalConfig,
    notify_failures: AtomicU64,
}

impl ApprovalManager {
    pub fn new(store: Arc<dyn ApprovalStore>, audit: Arc<dyn AuditSink>, config: ApprovalConfig) -> Self {
        Self {
            store,
            audit,
            notifiers: Vec::new(),
            config,
            notify_failures: AtomicU64::new(0),
        }
    }

    /// Add a best-effort notification channel.
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    /// Notifications that failed since this manager was built.
    pub fn notification_failures(&self) -> u64 {
        self.notify_failures.load(Ordering::Relaxed)
    }

    // ── Create ────────────────────────────────────────────────────────────────

    /// Park `ctx` until someone resolves it.
    pub fn create_from_verdict(&self, verdict: &Verdict, ctx: &RequestContext) -> Result<PendingApproval, ApprovalError> {
        self.create_at(verdict, ctx, Utc::now())
    }

    /// `create_from_verdict` as of `now`.
    ///
    /// If the same actor already has a pending record for the same resource,
    /// action class, and trace created within the dedup window, that record is
    /// returned and nothing new is stored.
    pub fn create_at(
        &self,
        verdict: &Verdict,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, ApprovalError> {
        if verdict.effect != VerdictEffect::Allow || !verdict.requires_approval {
            return Err(ApprovalError::NotApprovalRequired);
        }

        let candidate = PendingApproval::new(ctx.clone(), verdict.clone(), now);
        match self.store.insert_deduplicated(&candidate, now - self.config.dedup_window)? {
            InsertOutcome::Inserted(approval) => {
                info!(
                    approval_id = %approval.id,
                    trace_id = %ctx.trace_id,
                    resource = %ctx.resource.key(),
                    action = %ctx.action_class,
                    "approval requested"
                );
                self.dispatch(&approval, NotificationKind::Created, None);
                Ok(approval)
            }
            InsertOutcome::Existing(approval) => {
                debug!(approval_id = %approval.id, trace_id = %ctx.trace_id, "duplicate approval request collapsed");
                Ok(approval)
            }
        }
    }

    // ── Resolve ───────────────────────────────────────────────────────────────

    /// Approve or reject a pending record. Succeeds exactly once per record.
    pub fn resolve(
        &self,
        id: &ApprovalId,
        decision: ApprovalDecision,
        resolver: &str,
        note: Option<String>,
    ) -> Result<PendingApproval, ApprovalError> {
        self.resolve_at(id, decision, resolver, note, Utc::now())
    }

    /// `resolve` as of `now`.
    pub fn resolve_at(
        &self,
        id: &ApprovalId,
        decision: ApprovalDecision,
        resolver: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, ApprovalError> {
        let update = StatusUpdate {
            status: decision.status(),
            resolver: resolver.to_string(),
            resolved_at: now,
            note,
        };
        let resolved = self.transition(id, &update)?;
        let event = self.record_or_reopen(&resolved)?;

        info!(
            approval_id = %id,
            status = resolved.status.as_str(),
            resolver,
            seq = event.seq,
            "approval resolved"
        );
        self.dispatch(&resolved, NotificationKind::Resolved, Some(&event));
        Ok(resolved)
    }

    // ── Expire ────────────────────────────────────────────────────────────────

    /// Expire a pending record whose TTL has elapsed at `now`. Downstream this
    /// is an implicit deny.
    pub fn expire(&self, id: &ApprovalId, now: DateTime<Utc>) -> Result<PendingApproval, ApprovalError> {
        let current = self
            .store
            .get(id)?
            .ok_or_else(|| ApprovalError::NotFound { id: id.to_string() })?;
        if current.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved {
                id: id.to_string(),
                status: current.status.as_str().to_string(),
            });
        }
        if now < current.created_at + self.config.ttl {
            return Err(ApprovalError::NotExpired { id: id.to_string() });
        }

        let update = StatusUpdate {
            status: ApprovalStatus::Expired,
            resolver: TTL_RESOLVER.to_string(),
            resolved_at: now,
            note: Some(format!("no resolution within {}s", self.config.ttl.num_seconds())),
        };
        let expired = self.transition(id, &update)?;
        let event = self.record_or_reopen(&expired)?;

        warn!(approval_id = %id, trace_id = %expired.context.trace_id, seq = event.seq, "approval expired");
        self.dispatch(&expired, NotificationKind::Expired, Some(&event));
        Ok(expired)
    }

    /// Expire every pending record whose TTL has elapsed at `now`.
    ///
    /// Records resolved by someone else mid-sweep are skipped.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<PendingApproval>, ApprovalError> {
        let due: Vec<PendingApproval> = self
            .store
            .list(Some(ApprovalStatus::Pending))?
            .into_iter()
            .filter(|a| now >= a.created_at + self.config.ttl)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for approval in due {
            match self.expire(&approval.id, now) {
                Ok(a) => expired.push(a),
                Err(ApprovalError::AlreadyResolved { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    /// Delete terminal records resolved before `cutoff`. Pending records are
    /// never purged.
    pub fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ApprovalError> {
        let purged = self.store.purge_resolved_before(cutoff)?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "resolved approvals purged");
        }
        Ok(purged)
    }

    /// Apply the configured retention as of `now`.
    pub fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize, ApprovalError> {
        self.purge_resolved_before(now - self.config.retention)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &ApprovalId) -> Result<PendingApproval, ApprovalError> {
        self.store
            .get(id)?
            .ok_or_else(|| ApprovalError::NotFound { id: id.to_string() })
    }

    /// Outstanding records, oldest first.
    pub fn list_pending(&self) -> Result<Vec<PendingApproval>, ApprovalError> {
        Ok(self.store.list(Some(ApprovalStatus::Pending))?)
    }

    /// Every record, oldest first.
    pub fn list_all(&self) -> Result<Vec<PendingApproval>, ApprovalError> {
        Ok(self.store.list(None)?)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn transition(&self, id: &ApprovalId, update: &StatusUpdate) -> Result<PendingApproval, ApprovalError> {
        match self.store.compare_and_set(id, ApprovalStatus::Pending, update)? {
            CasOutcome::Swapped(record) => Ok(record),
            CasOutcome::Mismatch(status) => {
                debug!(approval_id = %id, status = status.as_str(), "approval already left pending");
                Err(ApprovalError::AlreadyResolved {
                    id: id.to_string(),
                    status: status.as_str().to_string(),
                })
            }
            CasOutcome::Missing => Err(ApprovalError::NotFound { id: id.to_string() }),
        }
    }

    /// Record a transition that just committed, or put the record back in
    /// `Pending` when the ledger refuses it.
    fn record_or_reopen(&self, approval: &PendingApproval) -> Result<Event, ApprovalError> {
        let err = match self.record_override(approval) {
            Ok(event) => return Ok(event),
            Err(e) => e,
        };
        match self.store.reopen(&approval.id, approval.status) {
            Ok(CasOutcome::Swapped(_)) => {
                warn!(approval_id = %approval.id, error = %err, "approval reopened after ledger append failed");
            }
            Ok(outcome) => {
                error!(approval_id = %approval.id, outcome = ?outcome, "approval could not be reopened");
            }
            Err(e) => {
                error!(approval_id = %approval.id, error = %e, "approval could not be reopened");
            }
        }
        Err(err)
    }

    /// Append the approval-sourced decision for a record that just left
    /// `Pending`.
    fn record_override(&self, approval: &PendingApproval) -> Result<Event, ApprovalError> {
        let resolution = approval.status.resolution().ok_or_else(|| StoreError::Backend {
            reason: format!("approval '{}' is still {}", approval.id, approval.status.as_str()),
        })?;

        let mut verdict = approval.verdict.clone();
        verdict.requires_approval = false;
        match resolution {
            Resolution::Approved => {
                verdict.effect = VerdictEffect::Allow;
                verdict.reasons.push(format!("approved by {}", approval.resolver.as_deref().unwrap_or("unknown")));
            }
            Resolution::Rejected => {
                verdict.effect = VerdictEffect::Deny;
                verdict.row_limit = None;
                verdict.reasons.push(format!("rejected by {}", approval.resolver.as_deref().unwrap_or("unknown")));
            }
            Resolution::Expired => {
                verdict.effect = VerdictEffect::Deny;
                verdict.row_limit = None;
                verdict.reasons.push("approval expired; treated as deny".to_string());
            }
        }

        let source = DecisionSource::Approval {
            approval_id: approval.id.to_string(),
            resolver: approval.resolver.clone().unwrap_or_default(),
            resolution,
        };
        let record = DecisionRecord::with_source(&approval.context, &verdict, source);

        self.audit.record(EventPayload::PolicyDecision(record)).map_err(|e| {
            error!(approval_id = %approval.id, error = %e, "approval transition not recorded in ledger");
            ApprovalError::from(e)
        })
    }

    fn dispatch(&self, approval: &PendingApproval, kind: NotificationKind, event: Option<&Event>) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(approval, kind, event) {
                self.notify_failures.fetch_add(1, Ordering::Relaxed);
                warn!(approval_id = %approval.id, error = %e, "approval notification failed");
            }
        }
    }
}

impl ApprovalQueue for ApprovalManager {
    fn submit(&self, verdict: &Verdict, ctx: &RequestContext) -> Result<PendingApproval, ApprovalError> {
        self.create_from_verdict(verdict, ctx)
    }
}

impl PendingApprovalSource for ApprovalManager {
    fn pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        self.store.list(Some(ApprovalStatus::Pending))
    }
}
