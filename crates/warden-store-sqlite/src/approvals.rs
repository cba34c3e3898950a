//! `ApprovalStore` over SQLite.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use warden_contracts::{
    approval::{ApprovalId, ApprovalStatus, PendingApproval},
    error::StoreError,
};
use warden_core::traits::{ApprovalStore, CasOutcome, InsertOutcome, PendingApprovalSource, StatusUpdate};

use crate::connection::{map_err, parse_ts, ts, Db};

const COLUMNS: &str = "id, created_at, status, context, verdict, resolver, resolved_at, note";

/// A durable approval store in a single SQLite file.
///
/// Status changes are `UPDATE … WHERE id = ? AND status = ?`, so the database
/// itself arbitrates concurrent resolvers, across processes too.
#[derive(Debug)]
pub struct SqliteApprovalStore {
    db: Db,
}

impl SqliteApprovalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { db: Db::open(path.as_ref())? })
    }

    /// Open an existing database for listing only; writes fail with
    /// `ReadOnly`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { db: Db::open_read_only(path.as_ref())? })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { db: Db::open_in_memory()? })
    }

    /// `"sqlite:<path>"` or `"sqlite::memory:"`.
    pub fn backend(&self) -> String {
        self.db.identity()
    }
}

struct RawApproval {
    id: String,
    created_at: String,
    status: String,
    context: String,
    verdict: String,
    resolver: Option<String>,
    resolved_at: Option<String>,
    note: Option<String>,
}

impl RawApproval {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            status: row.get(2)?,
            context: row.get(3)?,
            verdict: row.get(4)?,
            resolver: row.get(5)?,
            resolved_at: row.get(6)?,
            note: row.get(7)?,
        })
    }

    fn decode(self) -> Result<PendingApproval, StoreError> {
        let id = self.id;
        let bad = |reason: String| StoreError::Backend {
            reason: format!("approval '{id}' is unreadable: {reason}"),
        };
        let status = ApprovalStatus::parse(&self.status).ok_or_else(|| bad(format!("unknown status '{}'", self.status)))?;
        let created_at = parse_ts(&self.created_at).map_err(bad)?;
        let resolved_at = self.resolved_at.as_deref().map(parse_ts).transpose().map_err(bad)?;
        let context = serde_json::from_str(&self.context).map_err(|e| bad(e.to_string()))?;
        let verdict = serde_json::from_str(&self.verdict).map_err(|e| bad(e.to_string()))?;

        Ok(PendingApproval {
            id: ApprovalId(id.clone()),
            context,
            verdict,
            created_at,
            status,
            resolver: self.resolver,
            resolved_at,
            note: self.note,
        })
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend {
        reason: format!("cannot encode approval: {e}"),
    })
}

impl ApprovalStore for SqliteApprovalStore {
    fn insert_deduplicated(
        &self,
        approval: &PendingApproval,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let ctx = &approval.context;
        let context = encode(ctx)?;
        let verdict = encode(&approval.verdict)?;

        let mut conn = self.db.lock_for_write()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM approvals
                     WHERE status = 'pending' AND actor_id = ?1 AND resource_type = ?2
                       AND resource_id = ?3 AND environment = ?4 AND action_class = ?5
                       AND trace_id = ?6 AND created_at >= ?7
                     ORDER BY created_at LIMIT 1"
                ),
                params![
                    ctx.actor.id,
                    ctx.resource.resource_type,
                    ctx.resource.id,
                    ctx.resource.environment,
                    ctx.action_class.as_str(),
                    ctx.trace_id,
                    ts(&window_start),
                ],
                RawApproval::from_row,
            )
            .optional()
            .map_err(map_err)?;
        if let Some(raw) = existing {
            return Ok(InsertOutcome::Existing(raw.decode()?));
        }

        tx.execute(
            "INSERT INTO approvals (id, created_at, status, actor_id, resource_type, resource_id,
                                    environment, action_class, trace_id, context, verdict,
                                    resolver, resolved_at, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                approval.id.0,
                ts(&approval.created_at),
                approval.status.as_str(),
                ctx.actor.id,
                ctx.resource.resource_type,
                ctx.resource.id,
                ctx.resource.environment,
                ctx.action_class.as_str(),
                ctx.trace_id,
                context,
                verdict,
                approval.resolver,
                approval.resolved_at.as_ref().map(ts),
                approval.note,
            ],
        )
        .map_err(map_err)?;
        tx.commit().map_err(map_err)?;

        debug!(approval_id = %approval.id, "approval persisted");
        Ok(InsertOutcome::Inserted(approval.clone()))
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, StoreError> {
        let conn = self.db.lock()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM approvals WHERE id = ?1"),
            params![id.0],
            RawApproval::from_row,
        )
        .optional()
        .map_err(map_err)?
        .map(RawApproval::decode)
        .transpose()
    }

    fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<PendingApproval>, StoreError> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM approvals
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at, id"
            ))
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], RawApproval::from_row)
            .map_err(map_err)?;

        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(row.map_err(map_err)?.decode()?);
        }
        Ok(approvals)
    }

    fn compare_and_set(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &StatusUpdate,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.db.lock_for_write()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;

        let changed = tx
            .execute(
                "UPDATE approvals SET status = ?1, resolver = ?2, resolved_at = ?3, note = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    update.status.as_str(),
                    update.resolver,
                    ts(&update.resolved_at),
                    update.note,
                    id.0,
                    expected.as_str(),
                ],
            )
            .map_err(map_err)?;

        let current = tx
            .query_row(
                &format!("SELECT {COLUMNS} FROM approvals WHERE id = ?1"),
                params![id.0],
                RawApproval::from_row,
            )
            .optional()
            .map_err(map_err)?;
        tx.commit().map_err(map_err)?;

        match (changed, current) {
            (_, None) => Ok(CasOutcome::Missing),
            (1, Some(raw)) => Ok(CasOutcome::Swapped(raw.decode()?)),
            (_, Some(raw)) => Ok(CasOutcome::Mismatch(raw.decode()?.status)),
        }
    }

    fn reopen(&self, id: &ApprovalId, from: ApprovalStatus) -> Result<CasOutcome, StoreError> {
        let mut conn = self.db.lock_for_write()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;

        let changed = tx
            .execute(
                "UPDATE approvals SET status = 'pending', resolver = NULL, resolved_at = NULL, note = NULL
                 WHERE id = ?1 AND status = ?2",
                params![id.0, from.as_str()],
            )
            .map_err(map_err)?;

        let current = tx
            .query_row(
                &format!("SELECT {COLUMNS} FROM approvals WHERE id = ?1"),
                params![id.0],
                RawApproval::from_row,
            )
            .optional()
            .map_err(map_err)?;
        tx.commit().map_err(map_err)?;

        match (changed, current) {
            (_, None) => Ok(CasOutcome::Missing),
            (1, Some(raw)) => Ok(CasOutcome::Swapped(raw.decode()?)),
            (_, Some(raw)) => Ok(CasOutcome::Mismatch(raw.decode()?.status)),
        }
    }

    fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.db.lock_for_write()?;
        conn.execute(
            "DELETE FROM approvals WHERE status != 'pending' AND resolved_at IS NOT NULL AND resolved_at < ?1",
            params![ts(&cutoff)],
        )
        .map_err(map_err)
    }
}

impl PendingApprovalSource for SqliteApprovalStore {
    fn pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        self.list(Some(ApprovalStatus::Pending))
    }
}
