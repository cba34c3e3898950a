//! `EventStore` over SQLite.

use std::path::Path;

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use warden_contracts::{
    error::StoreError,
    event::{Event, EventPayload},
};
use warden_core::traits::{EventFilter, EventStore};

use crate::connection::{map_err, parse_ts, ts, Db};

const COLUMNS: &str = "seq, timestamp, kind, trace_id, payload, prev_hash, hash";

/// A durable event store in a single SQLite file.
///
/// Several processes may append to the same file: the append transaction
/// takes SQLite's write lock before reading the head, so two writers cannot
/// both claim the same seq.
#[derive(Debug)]
pub struct SqliteEventStore {
    db: Db,
}

impl SqliteEventStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { db: Db::open(path.as_ref())? })
    }

    /// Open an existing database without creating or migrating anything.
    /// `append` fails with `ReadOnly`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { db: Db::open_read_only(path.as_ref())? })
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self { db: Db::open_in_memory()? })
    }
}

/// The exact text stored in the `payload` column, and hashed by the ledger.
fn encode_payload(payload: &EventPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string(payload)
}

/// Raw column values; decoding happens after the row borrow ends so a bad
/// payload becomes `Corrupt` instead of a generic SQL error.
struct RawEvent {
    seq: u64,
    timestamp: String,
    kind: String,
    trace_id: String,
    payload: String,
    prev_hash: String,
    hash: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get::<_, i64>(0)? as u64,
            timestamp: row.get(1)?,
            kind: row.get(2)?,
            trace_id: row.get(3)?,
            payload: row.get(4)?,
            prev_hash: row.get(5)?,
            hash: row.get(6)?,
        })
    }

    /// Decode the row, rejecting anything that is not byte-for-byte what
    /// `append` wrote. Serde tolerates unknown fields and fills defaults, so
    /// the payload and timestamp are re-encoded and compared with the stored
    /// text. The `kind` and `trace_id` columns are outside the hash and must
    /// agree with the payload.
    fn decode(self) -> Result<Event, StoreError> {
        let seq = self.seq;
        let corrupt = |reason: String| StoreError::Corrupt { seq, reason };

        let timestamp = parse_ts(&self.timestamp).map_err(corrupt)?;
        if ts(&timestamp) != self.timestamp {
            return Err(corrupt(format!("timestamp '{}' is not in canonical form", self.timestamp)));
        }

        let payload: EventPayload = serde_json::from_str(&self.payload).map_err(|e| corrupt(e.to_string()))?;
        let canonical = encode_payload(&payload).map_err(|e| corrupt(e.to_string()))?;
        if canonical != self.payload {
            return Err(corrupt("payload text differs from its canonical encoding".to_string()));
        }
        if payload.kind().as_str() != self.kind {
            return Err(corrupt(format!(
                "kind column '{}' does not match payload type '{}'",
                self.kind,
                payload.kind()
            )));
        }
        if payload.trace_id() != self.trace_id {
            return Err(corrupt(format!(
                "trace_id column '{}' does not match payload trace '{}'",
                self.trace_id,
                payload.trace_id()
            )));
        }

        Ok(Event {
            seq: self.seq,
            timestamp,
            payload,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn backend(&self) -> String {
        self.db.identity()
    }

    fn append(&self, event: &Event) -> Result<Event, StoreError> {
        let payload = encode_payload(&event.payload).map_err(|e| StoreError::Backend {
            reason: format!("cannot encode payload: {e}"),
        })?;

        let mut conn = self.db.lock_for_write()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;
        let head: Option<i64> = tx
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .map_err(map_err)?;
        let head = head.unwrap_or(0) as u64;
        if event.seq != head + 1 {
            return Err(StoreError::Conflict {
                reason: format!("append of seq {} but head is {}", event.seq, head),
            });
        }

        tx.execute(
            "INSERT INTO events (seq, timestamp, kind, trace_id, payload, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.seq as i64,
                ts(&event.timestamp),
                event.kind().as_str(),
                event.payload.trace_id(),
                payload,
                event.prev_hash,
                event.hash,
            ],
        )
        .map_err(map_err)?;
        tx.commit().map_err(map_err)?;

        debug!(seq = event.seq, "event persisted");
        Ok(event.clone())
    }

    /// The kind filter is applied to the decoded payload, never to the
    /// `kind` column, so a rewritten column cannot hide an event.
    fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM events
                 WHERE seq > ?1 AND timestamp >= ?2
                 ORDER BY seq"
            ))
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![filter.after_seq as i64, ts(&filter.since)], RawEvent::from_row)
            .map_err(map_err)?;

        let mut events = Vec::new();
        for row in rows {
            if events.len() >= filter.limit {
                break;
            }
            let event = row.map_err(map_err)?.decode()?;
            if filter.kind.map_or(true, |k| event.kind() == k) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn get(&self, seq: u64) -> Result<Event, StoreError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM events WHERE seq = ?1"),
                params![seq as i64],
                RawEvent::from_row,
            )
            .optional()
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound { key: format!("seq {seq}") })?;
        raw.decode()
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.db.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(map_err)?;
        Ok(n as u64)
    }

    fn last(&self) -> Result<Option<Event>, StoreError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM events ORDER BY seq DESC LIMIT 1"),
                [],
                RawEvent::from_row,
            )
            .optional()
            .map_err(map_err)?;
        raw.map(RawEvent::decode).transpose()
    }
}
