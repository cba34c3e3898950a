//! Trait definitions for the WARDEN governance pipeline.
//!
//! These traits define the trust boundary and the storage seams:
//!
//! - `DecisionEngine`: trusted gate, pure and stateless
//! - `AuditSink`: trusted sink, appends to the hash-chained ledger
//! - `ApprovalQueue`: parks approval-required requests
//! - `ToolRunner`: untrusted executor of concrete infrastructure tools
//! - `EventStore`: durable storage behind the ledger
//! - `ApprovalStore`: durable storage behind the approval manager
//! - `Notifier`: best-effort outbound notifications
//!
//! The gateway wires them together in trust order. A `ToolRunner` is never
//! called unless the decision engine allowed the request and the decision was
//! recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_contracts::{
    approval::{ApprovalId, ApprovalStatus, NotificationKind, PendingApproval},
    error::{ApprovalError, LedgerError, NotifyError, StoreError, WardenResult},
    event::{Event, EventKind, EventPayload},
    policy::Verdict,
    request::RequestContext,
};

/// The policy decision engine.
///
/// Implementations must be pure: the verdict is a function of the request,
/// the loaded policy set, and the evaluation time only. No I/O, no state kept
/// between calls, safe to call from many threads at once.
pub trait DecisionEngine: Send + Sync {
    /// Evaluate `ctx` as of `now`.
    fn evaluate_at(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Verdict;

    /// Evaluate `ctx` as of its own timestamp.
    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        self.evaluate_at(ctx, ctx.timestamp)
    }
}

/// The append side of the audit ledger, as seen by the gateway.
pub trait AuditSink: Send + Sync {
    /// Validate, chain, and persist one event. Returns the stored event.
    fn record(&self, payload: EventPayload) -> Result<Event, LedgerError>;
}

/// Where approval-required verdicts are parked.
pub trait ApprovalQueue: Send + Sync {
    /// Create (or return the in-flight duplicate of) a pending approval.
    fn submit(&self, verdict: &Verdict, ctx: &RequestContext) -> Result<PendingApproval, ApprovalError>;
}

/// A concrete tool invocation the gateway is asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// The request to evaluate.
    pub context: RequestContext,
    /// Tool name, e.g. `"psql"` or `"kubectl"`.
    pub tool: String,
    /// The command the tool will run, recorded verbatim.
    pub command: String,
}

/// What a tool reports after running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReport {
    /// Rows touched, when the tool knows.
    pub rows_affected: Option<u64>,
    /// Wall-clock runtime.
    pub duration_ms: u64,
}

/// Executes allowed invocations against real infrastructure.
///
/// Implementations are **untrusted** from the gateway's perspective. Concrete
/// database and cluster clients live outside the core.
pub trait ToolRunner: Send + Sync {
    /// Run `invocation`, honouring `row_limit` when present.
    fn run(&self, invocation: &ToolInvocation, row_limit: Option<u64>) -> WardenResult<ToolReport>;
}

/// Filter for `EventStore::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events with `timestamp >= since`.
    pub since: DateTime<Utc>,
    /// Only events of this kind.
    pub kind: Option<EventKind>,
    /// Only events with `seq > after_seq`.
    pub after_seq: u64,
    /// At most this many events.
    pub limit: usize,
}

impl EventFilter {
    /// Every event after `after_seq`, regardless of time or kind.
    pub fn after(after_seq: u64, limit: usize) -> Self {
        Self {
            since: DateTime::<Utc>::MIN_UTC,
            kind: None,
            after_seq,
            limit,
        }
    }
}

/// Durable storage behind the ledger.
///
/// The ledger owns chaining and sequencing; the store only persists and
/// returns whole events. Every event a reader observes must be complete.
pub trait EventStore: Send + Sync {
    /// Backend identity for reports, e.g. `"memory"` or `"sqlite:/var/audit.db"`.
    fn backend(&self) -> String;

    /// Persist `event`. Must fail with `Conflict` if `event.seq` is not exactly
    /// one past the current highest sequence number.
    fn append(&self, event: &Event) -> Result<Event, StoreError>;

    /// Events matching `filter`, ascending by seq.
    fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    /// The event at `seq`.
    fn get(&self, seq: u64) -> Result<Event, StoreError>;

    /// Number of stored events.
    fn count(&self) -> Result<u64, StoreError>;

    /// The highest-seq event, if any.
    fn last(&self) -> Result<Option<Event>, StoreError>;
}

/// Fields written when an approval leaves `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ApprovalStatus,
    pub resolver: String,
    pub resolved_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Result of `ApprovalStore::compare_and_set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The status matched and was replaced. Carries the updated record.
    Swapped(PendingApproval),
    /// The status did not match. Carries the status actually found.
    Mismatch(ApprovalStatus),
    /// No record under that id.
    Missing,
}

/// Result of `ApprovalStore::insert_deduplicated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The new record was stored.
    Inserted(PendingApproval),
    /// An identical pending request already existed; nothing was stored.
    Existing(PendingApproval),
}

/// Durable storage behind the approval manager.
pub trait ApprovalStore: Send + Sync {
    /// Atomically store `approval` unless a pending record for the same
    /// actor, resource, action class, and trace was created at or after
    /// `window_start`.
    fn insert_deduplicated(
        &self,
        approval: &PendingApproval,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;

    /// The record under `id`, if any.
    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, StoreError>;

    /// Records with the given status (all records when `None`), oldest first.
    fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<PendingApproval>, StoreError>;

    /// Atomically replace the status of `id` if it currently equals `expected`.
    fn compare_and_set(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &StatusUpdate,
    ) -> Result<CasOutcome, StoreError>;

    /// Return `id` to `Pending`, clearing its resolution, if its status still
    /// equals `from`. Undoes a transition whose ledger append failed.
    fn reopen(&self, id: &ApprovalId, from: ApprovalStatus) -> Result<CasOutcome, StoreError>;

    /// Delete terminal records resolved before `cutoff`. Returns the count.
    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Read-only view of outstanding approvals, used by the reporter.
pub trait PendingApprovalSource: Send + Sync {
    /// Every approval still in `Pending`, oldest first.
    fn pending(&self) -> Result<Vec<PendingApproval>, StoreError>;
}

/// Best-effort outbound notification channel.
///
/// A failing notifier never fails the operation that triggered it.
pub trait Notifier: Send + Sync {
    /// Announce a lifecycle change of `approval`. `event` is the ledger entry
    /// recorded for it, when there is one.
    fn notify(
        &self,
        approval: &PendingApproval,
        kind: NotificationKind,
        event: Option<&Event>,
    ) -> Result<(), NotifyError>;
}
