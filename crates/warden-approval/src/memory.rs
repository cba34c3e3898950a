//! In-memory implementation of `ApprovalStore`.
//!
//! One `Mutex` guards the whole record list, which makes the dedup check and
//! the insert, and the status compare and the swap, each a single atomic step.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use warden_contracts::{
    approval::{ApprovalId, ApprovalStatus, PendingApproval},
    error::StoreError,
};
use warden_core::traits::{ApprovalStore, CasOutcome, InsertOutcome, PendingApprovalSource, StatusUpdate};

/// A volatile, process-local approval store. Records are kept in creation
/// order.
#[derive(Debug, Default)]
pub struct InMemoryApprovalStore {
    records: Mutex<Vec<PendingApproval>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<PendingApproval>>, StoreError> {
        self.records.lock().map_err(|e| StoreError::Backend {
            reason: format!("approval store lock poisoned: {e}"),
        })
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn insert_deduplicated(
        &self,
        approval: &PendingApproval,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut records = self.lock()?;
        let existing = records.iter().find(|r| {
            r.status == ApprovalStatus::Pending
                && r.created_at >= window_start
                && r.same_request(&approval.context)
        });
        if let Some(existing) = existing {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        records.push(approval.clone());
        Ok(InsertOutcome::Inserted(approval.clone()))
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, StoreError> {
        Ok(self.lock()?.iter().find(|r| &r.id == id).cloned())
    }

    fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    fn compare_and_set(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &StatusUpdate,
    ) -> Result<CasOutcome, StoreError> {
        let mut records = self.lock()?;
        let Some(record) = records.iter_mut().find(|r| &r.id == id) else {
            return Ok(CasOutcome::Missing);
        };
        if record.status != expected {
            return Ok(CasOutcome::Mismatch(record.status));
        }
        record.status = update.status;
        record.resolver = Some(update.resolver.clone());
        record.resolved_at = Some(update.resolved_at);
        record.note = update.note.clone();
        Ok(CasOutcome::Swapped(record.clone()))
    }

    fn reopen(&self, id: &ApprovalId, from: ApprovalStatus) -> Result<CasOutcome, StoreError> {
        let mut records = self.lock()?;
        let Some(record) = records.iter_mut().find(|r| &r.id == id) else {
            return Ok(CasOutcome::Missing);
        };
        if record.status != from {
            return Ok(CasOutcome::Mismatch(record.status));
        }
        record.status = ApprovalStatus::Pending;
        record.resolver = None;
        record.resolved_at = None;
        record.note = None;
        Ok(CasOutcome::Swapped(record.clone()))
    }

    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| !(r.status.is_terminal() && r.resolved_at.is_some_and(|at| at < cutoff)));
        Ok(before - records.len())
    }
}

impl PendingApprovalSource for InMemoryApprovalStore {
    fn pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        self.list(Some(ApprovalStatus::Pending))
    }
}
