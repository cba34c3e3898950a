//! # warden-audit
//!
//! Append-only, SHA-256 hash-chained audit ledger for WARDEN.
//!
//! ## Overview
//!
//! Every event appended to a [`Ledger`] links to its predecessor via the
//! predecessor's hash. Altering, reordering, or deleting any stored event
//! breaks the chain, and [`Ledger::verify`] reports the first sequence number
//! where it breaks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_audit::{InMemoryEventStore, Ledger};
//!
//! let ledger = Ledger::open(Arc::new(InMemoryEventStore::new()))?;
//! ledger.append(payload)?;
//! assert!(ledger.verify()?.valid);
//! ```

pub mod chain;
pub mod ledger;
pub mod memory;
pub mod schema;

pub use chain::{hash_event, verify_chain, ChainReport, ChainWalker};
pub use ledger::{Ledger, LedgerIter, LedgerQuery, VerifyOptions, DEFAULT_PAGE_SIZE};
pub use memory::InMemoryEventStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
