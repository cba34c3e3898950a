//! # warden-store-sqlite
//!
//! Durable SQLite backends for the WARDEN storage seams:
//!
//! - [`SqliteEventStore`] implements `EventStore` for the ledger.
//! - [`SqliteApprovalStore`] implements `ApprovalStore` for the approval
//!   manager.
//!
//! Both may point at the same file. WAL journaling lets readers (the
//! reporter) run while a gateway appends.

mod connection;

pub mod approvals;
pub mod events;
pub mod schema;

pub use approvals::SqliteApprovalStore;
pub use connection::BUSY_TIMEOUT;
pub use events::SqliteEventStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
