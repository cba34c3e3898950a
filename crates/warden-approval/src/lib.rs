//! # warden-approval
//!
//! Tracks approval-required verdicts from creation to resolution.
//!
//! - [`ApprovalManager`]: create (with dedup), compare-and-set resolve,
//!   TTL expiry, retention purge. Every transition lands in the ledger.
//! - [`InMemoryApprovalStore`]: the reference `ApprovalStore`.
//! - [`WebhookNotifier`]: best-effort JSON webhook notifications.

pub mod manager;
pub mod memory;
pub mod webhook;

pub use manager::{ApprovalConfig, ApprovalManager, TTL_RESOLVER};
pub use memory::InMemoryApprovalStore;
pub use webhook::{ApprovalNotification, WebhookNotifier};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier, Mutex},
        thread,
    };

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use warden_audit::{InMemoryEventStore, Ledger};
    use warden_contracts::{
        approval::{ApprovalDecision, ApprovalStatus, NotificationKind, PendingApproval},
        error::{ApprovalError, NotifyError},
        event::{DecisionSource, Event, EventPayload, Resolution},
        policy::{Verdict, VerdictEffect},
        request::{ActionClass, Actor, Origin, RequestContext, Resource},
    };
    use warden_core::traits::{ApprovalQueue, Notifier, PendingApprovalSource};

    use super::{ApprovalConfig, ApprovalManager, InMemoryApprovalStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
    }

    fn ctx(trace: &str) -> RequestContext {
        RequestContext {
            actor: Actor { id: "sre-agent".to_string(), role: "sre".to_string() },
            resource: Resource {
                resource_type: "database".to_string(),
                id: "prod-db".to_string(),
                environment: "prod".to_string(),
            },
            action_class: ActionClass::Write,
            timestamp: t0(),
            trace_id: trace.to_string(),
            origin: Origin::AgentMediated,
        }
    }

    fn needs_approval() -> Verdict {
        Verdict {
            effect: VerdictEffect::Allow,
            policy_id: Some("P1".to_string()),
            matched_policies: vec!["P1".to_string()],
            requires_approval: true,
            row_limit: Some(1000),
            reasons: vec!["approval required by 'P1'".to_string()],
        }
    }

    fn setup() -> (Arc<Ledger>, ApprovalManager) {
        let ledger = Arc::new(Ledger::open(Arc::new(InMemoryEventStore::new())).unwrap());
        let manager = ApprovalManager::new(
            Arc::new(InMemoryApprovalStore::new()),
            ledger.clone(),
            ApprovalConfig::default(),
        );
        (ledger, manager)
    }

    /// Like `setup`, with a handle on the event store to take it offline.
    fn setup_with_events() -> (Arc<InMemoryEventStore>, Arc<Ledger>, ApprovalManager) {
        let events = Arc::new(InMemoryEventStore::new());
        let ledger = Arc::new(Ledger::open(events.clone()).unwrap());
        let manager = ApprovalManager::new(
            Arc::new(InMemoryApprovalStore::new()),
            ledger.clone(),
            ApprovalConfig::default(),
        );
        (events, ledger, manager)
    }

    fn decisions(ledger: &Ledger) -> Vec<Event> {
        ledger.query(DateTime::<Utc>::MIN_UTC, None).collect_all().unwrap()
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _: &PendingApproval, _: NotificationKind, _: Option<&Event>) -> Result<(), NotifyError> {
            Err(NotifyError { reason: "webhook down".to_string() })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Arc<Mutex<Vec<NotificationKind>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, _: &PendingApproval, kind: NotificationKind, _: Option<&Event>) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(kind);
            Ok(())
        }
    }

    // ── Create ────────────────────────────────────────────────────────────────

    #[test]
    fn test_create_requires_approval_verdict() {
        let (_, manager) = setup();
        let mut verdict = needs_approval();
        verdict.requires_approval = false;
        assert!(matches!(
            manager.create_at(&verdict, &ctx("t-1"), t0()),
            Err(ApprovalError::NotApprovalRequired)
        ));
    }

    /// An identical in-flight request returns the existing record.
    #[test]
    fn test_duplicate_request_within_window_is_collapsed() {
        let (_, manager) = setup();
        let first = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let again = manager
            .create_at(&needs_approval(), &ctx("t-1"), t0() + Duration::seconds(30))
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(manager.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_outside_window_or_other_trace_is_new() {
        let (_, manager) = setup();
        let first = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let later = manager
            .create_at(&needs_approval(), &ctx("t-1"), t0() + Duration::minutes(5))
            .unwrap();
        let other = manager.create_at(&needs_approval(), &ctx("t-2"), t0()).unwrap();

        assert_ne!(first.id, later.id);
        assert_ne!(first.id, other.id);
        assert_eq!(manager.pending().unwrap().len(), 3);
    }

    #[test]
    fn test_submit_goes_through_queue_trait() {
        let (_, manager) = setup();
        let queue: &dyn ApprovalQueue = &manager;
        let approval = queue.submit(&needs_approval(), &ctx("t-1")).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    // ── Resolve ───────────────────────────────────────────────────────────────

    /// Approving records an approval-sourced allow in the ledger.
    #[test]
    fn test_resolve_records_override_decision() {
        let (ledger, manager) = setup();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();

        let resolved = manager
            .resolve(&approval.id, ApprovalDecision::Approve, "alice", Some("ticket OPS-12".to_string()))
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolver.as_deref(), Some("alice"));

        let events = decisions(&ledger);
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::PolicyDecision(d) => {
                assert_eq!(d.effect, VerdictEffect::Allow);
                assert!(!d.requires_approval);
                assert_eq!(d.row_limit, Some(1000));
                match &d.source {
                    DecisionSource::Approval { resolver, resolution, .. } => {
                        assert_eq!(resolver, "alice");
                        assert_eq!(*resolution, Resolution::Approved);
                    }
                    other => panic!("expected approval source, got {:?}", other),
                }
            }
            other => panic!("expected PolicyDecision, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_records_deny() {
        let (ledger, manager) = setup();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        manager.resolve(&approval.id, ApprovalDecision::Reject, "bob", None).unwrap();

        match &decisions(&ledger)[0].payload {
            EventPayload::PolicyDecision(d) => {
                assert_eq!(d.effect, VerdictEffect::Deny);
                assert_eq!(d.row_limit, None);
            }
            other => panic!("expected PolicyDecision, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_twice_fails_second_time() {
        let (ledger, manager) = setup();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();

        manager.resolve(&approval.id, ApprovalDecision::Reject, "bob", None).unwrap();
        match manager.resolve(&approval.id, ApprovalDecision::Approve, "alice", None) {
            Err(ApprovalError::AlreadyResolved { status, .. }) => assert_eq!(status, "rejected"),
            other => panic!("expected AlreadyResolved, got {:?}", other),
        }
        assert_eq!(decisions(&ledger).len(), 1, "a failed resolve must not append");
    }

    #[test]
    fn test_resolve_unknown_id_is_not_found() {
        let (_, manager) = setup();
        let id = warden_contracts::approval::ApprovalId::new();
        assert!(matches!(
            manager.resolve(&id, ApprovalDecision::Approve, "alice", None),
            Err(ApprovalError::NotFound { .. })
        ));
    }

    /// Racing resolvers: exactly one wins, every other gets AlreadyResolved.
    #[test]
    fn test_concurrent_resolve_succeeds_exactly_once() {
        let (ledger, manager) = setup();
        let manager = Arc::new(manager);
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                let id = approval.id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let decision = if i % 2 == 0 { ApprovalDecision::Approve } else { ApprovalDecision::Reject };
                    manager.resolve(&id, decision, &format!("resolver-{i}"), None)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(ApprovalError::AlreadyResolved { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(losses, 7);
        assert_eq!(decisions(&ledger).len(), 1);
    }

    /// A resolution the ledger cannot record is undone and can be retried.
    #[test]
    fn test_resolve_with_ledger_offline_stays_pending() {
        let (events, ledger, manager) = setup_with_events();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();

        events.set_offline(true);
        match manager.resolve(&approval.id, ApprovalDecision::Approve, "alice", None) {
            Err(ApprovalError::Ledger(_)) => {}
            other => panic!("expected Ledger error, got {:?}", other),
        }
        let record = manager.get(&approval.id).unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.resolver, None);
        assert_eq!(record.resolved_at, None);

        events.set_offline(false);
        let resolved = manager
            .resolve(&approval.id, ApprovalDecision::Approve, "alice", None)
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(decisions(&ledger).len(), 1);
    }

    // ── Expire ────────────────────────────────────────────────────────────────

    #[test]
    fn test_expire_before_ttl_is_rejected() {
        let (_, manager) = setup();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        assert!(matches!(
            manager.expire(&approval.id, t0() + Duration::minutes(59)),
            Err(ApprovalError::NotExpired { .. })
        ));
    }

    /// Expiry is an implicit deny on record.
    #[test]
    fn test_expire_after_ttl_records_deny() {
        let (ledger, manager) = setup();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let expired = manager.expire(&approval.id, t0() + Duration::hours(1)).unwrap();

        assert_eq!(expired.status, ApprovalStatus::Expired);
        assert_eq!(expired.resolver.as_deref(), Some(super::TTL_RESOLVER));
        match &decisions(&ledger)[0].payload {
            EventPayload::PolicyDecision(d) => {
                assert_eq!(d.effect, VerdictEffect::Deny);
                assert!(matches!(d.source, DecisionSource::Approval { resolution: Resolution::Expired, .. }));
            }
            other => panic!("expected PolicyDecision, got {:?}", other),
        }
        assert!(matches!(
            manager.resolve(&approval.id, ApprovalDecision::Approve, "alice", None),
            Err(ApprovalError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn test_expire_with_ledger_offline_stays_pending() {
        let (events, ledger, manager) = setup_with_events();
        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let due = t0() + Duration::hours(2);

        events.set_offline(true);
        assert!(matches!(manager.expire(&approval.id, due), Err(ApprovalError::Ledger(_))));
        assert!(matches!(manager.expire_stale(due), Err(ApprovalError::Ledger(_))));
        assert_eq!(manager.get(&approval.id).unwrap().status, ApprovalStatus::Pending);
        assert_eq!(manager.pending().unwrap().len(), 1);

        events.set_offline(false);
        assert_eq!(manager.expire_stale(due).unwrap().len(), 1);
        assert_eq!(manager.get(&approval.id).unwrap().status, ApprovalStatus::Expired);
        assert_eq!(decisions(&ledger).len(), 1);
    }

    #[test]
    fn test_expire_stale_sweeps_only_overdue() {
        let (_, manager) = setup();
        let old = manager.create_at(&needs_approval(), &ctx("t-old"), t0()).unwrap();
        let fresh = manager
            .create_at(&needs_approval(), &ctx("t-new"), t0() + Duration::minutes(50))
            .unwrap();

        let expired = manager.expire_stale(t0() + Duration::minutes(61)).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old.id);
        assert_eq!(manager.get(&fresh.id).unwrap().status, ApprovalStatus::Pending);
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    #[test]
    fn test_purge_keeps_pending_and_recent() {
        let (_, manager) = setup();
        let done = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        manager
            .resolve_at(&done.id, ApprovalDecision::Approve, "alice", None, t0())
            .unwrap();
        let waiting = manager.create_at(&needs_approval(), &ctx("t-2"), t0()).unwrap();

        assert_eq!(manager.apply_retention(t0() + Duration::days(29)).unwrap(), 0);
        assert_eq!(manager.apply_retention(t0() + Duration::days(31)).unwrap(), 1);

        assert!(matches!(manager.get(&done.id), Err(ApprovalError::NotFound { .. })));
        assert_eq!(manager.get(&waiting.id).unwrap().status, ApprovalStatus::Pending);
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    /// A failing notifier never fails the resolution; failures are counted.
    #[test]
    fn test_notifier_failure_is_not_propagated() {
        let ledger = Arc::new(Ledger::open(Arc::new(InMemoryEventStore::new())).unwrap());
        let manager = ApprovalManager::new(Arc::new(InMemoryApprovalStore::new()), ledger, ApprovalConfig::default())
            .with_notifier(Box::new(FailingNotifier));

        let approval = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        let resolved = manager.resolve(&approval.id, ApprovalDecision::Approve, "alice", None);

        assert!(resolved.is_ok());
        assert_eq!(manager.notification_failures(), 2);
    }

    #[test]
    fn test_notifier_sees_lifecycle() {
        let ledger = Arc::new(Ledger::open(Arc::new(InMemoryEventStore::new())).unwrap());
        let recorder = RecordingNotifier::default();
        let seen = Arc::clone(&recorder.seen);
        let manager = ApprovalManager::new(Arc::new(InMemoryApprovalStore::new()), ledger, ApprovalConfig::default())
            .with_notifier(Box::new(recorder));

        let a = manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        manager.create_at(&needs_approval(), &ctx("t-1"), t0()).unwrap();
        manager.expire(&a.id, t0() + Duration::hours(2)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![NotificationKind::Created, NotificationKind::Expired]
        );
    }
}
