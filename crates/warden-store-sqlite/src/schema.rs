//! Database schema for the WARDEN stores.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Applied on every open; idempotent.
pub const SCHEMA: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;

-- Ledger events. A row is written in one statement, so readers never see a
-- partial event. Timestamps are RFC 3339 with nanoseconds and Z, which sorts
-- lexicographically.
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY NOT NULL,
    timestamp TEXT NOT NULL,
    kind TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL
);

-- Approval records. context and verdict are immutable JSON snapshots; the
-- lifecycle columns change exactly once, by compare-and-set on status.
CREATE TABLE IF NOT EXISTS approvals (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    environment TEXT NOT NULL,
    action_class TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    context TEXT NOT NULL,
    verdict TEXT NOT NULL,
    resolver TEXT,
    resolved_at TEXT,
    note TEXT
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO schema_version (version) VALUES (1);

CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
CREATE INDEX IF NOT EXISTS idx_events_trace_id ON events(trace_id);
CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status);
CREATE INDEX IF NOT EXISTS idx_approvals_request
    ON approvals(actor_id, resource_type, resource_id, action_class, trace_id);
";

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    #[test]
    fn test_schema_is_idempotent_and_versioned() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('events', 'approvals')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
