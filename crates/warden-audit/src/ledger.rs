//! The audit ledger: an explicit, append-only hash chain over an `EventStore`.
//!
//! There is no global ledger. Callers `open` one over a storage handle and
//! pass `Arc<Ledger>` to every consumer. `close` ends the append side; reads
//! keep working so a closing process can still verify what it wrote.
//!
//! Appends are serialized by a single writer mutex that owns the chain tail,
//! so sequence numbers and `prev_hash` links are linearizable. Reads go
//! straight to the store.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use warden_contracts::{
    error::{LedgerError, StoreError},
    event::{Event, EventKind, EventPayload},
};
use warden_core::traits::{AuditSink, EventFilter, EventStore};

use crate::{
    chain::{hash_event, ChainReport, ChainWalker},
    schema::{validate_ingest, validate_payload},
};

/// Events fetched per store round-trip by `verify` and `LedgerQuery`.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// How many times an append re-reads the tail after losing a seq race to
/// another process sharing the same store.
const CONFLICT_RETRIES: usize = 3;

/// The writer-owned end of the chain.
#[derive(Debug)]
struct Tail {
    last_seq: u64,
    last_hash: String,
}

impl Tail {
    fn from_last(last: Option<Event>) -> Self {
        match last {
            Some(e) => Self { last_seq: e.seq, last_hash: e.hash },
            None => Self { last_seq: 0, last_hash: Event::GENESIS_HASH.to_string() },
        }
    }
}

/// Bounds on a verification pass.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Give up with `TimedOut` once this instant passes.
    pub deadline: Option<Instant>,
    /// Give up with `Cancelled` once this flag is set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl VerifyOptions {
    fn check(&self, checked: u64) -> Result<(), LedgerError> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(LedgerError::Cancelled { checked });
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(LedgerError::TimedOut { checked });
            }
        }
        Ok(())
    }
}

/// An open hash-chained ledger.
pub struct Ledger {
    store: Arc<dyn EventStore>,
    writer: Mutex<Tail>,
    closed: AtomicBool,
    page_size: usize,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("backend", &self.store.backend())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Ledger {
    /// Open a ledger over `store`, picking up the chain where it ends.
    pub fn open(store: Arc<dyn EventStore>) -> Result<Self, LedgerError> {
        let tail = Tail::from_last(store.last()?);
        info!(backend = %store.backend(), head_seq = tail.last_seq, "ledger opened");
        Ok(Self {
            store,
            writer: Mutex::new(tail),
            closed: AtomicBool::new(false),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the page size used by `verify` and `query`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stop accepting appends. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(backend = %self.store.backend(), "ledger closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Backend identity as reported by the store.
    pub fn backend(&self) -> String {
        self.store.backend()
    }

    /// Append `payload` stamped with the current time.
    pub fn append(&self, payload: EventPayload) -> Result<Event, LedgerError> {
        self.append_at(payload, Utc::now())
    }

    /// Append `payload` stamped with `timestamp`.
    ///
    /// Fails with `InvalidEvent` before touching the chain if a required field
    /// is missing.
    pub fn append_at(&self, payload: EventPayload, timestamp: DateTime<Utc>) -> Result<Event, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::LedgerClosed);
        }
        if let Err(e) = validate_payload(&payload) {
            warn!(kind = %payload.kind(), error = %e, "event rejected");
            return Err(e);
        }

        let mut tail = self.writer.lock().map_err(|e| StoreError::Backend {
            reason: format!("ledger writer lock poisoned: {e}"),
        })?;
        // A close may have landed while we waited for the lock.
        if self.is_closed() {
            return Err(LedgerError::LedgerClosed);
        }

        let mut attempt = 0;
        loop {
            let seq = tail.last_seq + 1;
            let hash = hash_event(&tail.last_hash, &payload, seq, &timestamp).map_err(|e| {
                LedgerError::InvalidEvent {
                    kind: payload.kind().to_string(),
                    reason: format!("payload cannot be serialized: {e}"),
                }
            })?;
            let event = Event {
                seq,
                timestamp,
                payload: payload.clone(),
                prev_hash: tail.last_hash.clone(),
                hash,
            };

            match self.store.append(&event) {
                Ok(stored) => {
                    tail.last_seq = stored.seq;
                    tail.last_hash = stored.hash.clone();
                    debug!(seq = stored.seq, kind = %stored.kind(), trace_id = %stored.payload.trace_id(), "event appended");
                    return Ok(stored);
                }
                Err(StoreError::Conflict { reason }) if attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(seq, attempt, %reason, "append lost a seq race; re-reading tail");
                    *tail = Tail::from_last(self.store.last()?);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Validate a raw producer body against the schema for `kind`, then
    /// append it.
    pub fn ingest(&self, kind: EventKind, body: &Value) -> Result<Event, LedgerError> {
        let payload = validate_ingest(kind, body)?;
        self.append(payload)
    }

    /// Recheck the whole chain with no bounds.
    pub fn verify(&self) -> Result<ChainReport, LedgerError> {
        self.verify_with(&VerifyOptions::default())
    }

    /// Recheck every stored event in ascending seq order.
    ///
    /// An integrity failure is a *result* (`valid == false`), not an error.
    /// Errors are reserved for the pass itself not finishing: cancellation,
    /// timeout, or the store being unreachable. Aborting has no side effects.
    pub fn verify_with(&self, options: &VerifyOptions) -> Result<ChainReport, LedgerError> {
        let mut walker = ChainWalker::new();
        let mut after_seq = 0;

        loop {
            options.check(walker.checked())?;
            let page = match self.store.list(&EventFilter::after(after_seq, self.page_size)) {
                Ok(page) => page,
                Err(StoreError::Corrupt { seq, reason }) => {
                    let report = walker.invalid_report(seq, format!("stored event does not decode: {reason}"));
                    log_invalid(&report);
                    return Ok(report);
                }
                Err(e) => return Err(e.into()),
            };
            let Some(last) = page.last().map(|e| e.seq) else {
                break;
            };

            for event in &page {
                options.check(walker.checked())?;
                if let Err(reason) = walker.check(event) {
                    let report = walker.invalid_report(event.seq, reason);
                    log_invalid(&report);
                    return Ok(report);
                }
            }

            if page.len() < self.page_size {
                break;
            }
            after_seq = last;
        }

        let report = walker.valid_report();
        info!(total = report.total, "ledger chain verified");
        Ok(report)
    }

    /// A restartable, lazily paged view of events with `timestamp >= since`,
    /// optionally of one kind only.
    pub fn query(&self, since: DateTime<Utc>, kind: Option<EventKind>) -> LedgerQuery {
        LedgerQuery {
            store: Arc::clone(&self.store),
            since,
            kind,
            page_size: self.page_size,
        }
    }

    /// The event at `seq`.
    pub fn get(&self, seq: u64) -> Result<Event, LedgerError> {
        Ok(self.store.get(seq)?)
    }

    /// Number of stored events.
    pub fn count(&self) -> Result<u64, LedgerError> {
        Ok(self.store.count()?)
    }

    /// The most recently appended event, if any.
    pub fn head(&self) -> Result<Option<Event>, LedgerError> {
        Ok(self.store.last()?)
    }
}

fn log_invalid(report: &ChainReport) {
    error!(
        first_invalid = ?report.first_invalid,
        reason = report.reason.as_deref().unwrap_or(""),
        "ledger chain integrity violated"
    );
}

impl AuditSink for Ledger {
    fn record(&self, payload: EventPayload) -> Result<Event, LedgerError> {
        self.append(payload)
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

/// A query over the ledger. Holds no cursor: every `iter()` re-scans the
/// store from the beginning.
#[derive(Clone)]
pub struct LedgerQuery {
    store: Arc<dyn EventStore>,
    since: DateTime<Utc>,
    kind: Option<EventKind>,
    page_size: usize,
}

impl LedgerQuery {
    /// Start a fresh scan.
    pub fn iter(&self) -> LedgerIter {
        LedgerIter {
            query: self.clone(),
            buffer: VecDeque::new(),
            after_seq: 0,
            exhausted: false,
        }
    }

    /// Drain a fresh scan into a `Vec`, stopping at the first error.
    pub fn collect_all(&self) -> Result<Vec<Event>, LedgerError> {
        self.iter().collect()
    }
}

/// The lazy sequence produced by `LedgerQuery::iter`. Yields at most one
/// error, after which it is exhausted.
pub struct LedgerIter {
    query: LedgerQuery,
    buffer: VecDeque<Event>,
    after_seq: u64,
    exhausted: bool,
}

impl Iterator for LedgerIter {
    type Item = Result<Event, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.buffer.pop_front() {
            return Some(Ok(event));
        }
        if self.exhausted {
            return None;
        }

        let filter = EventFilter {
            since: self.query.since,
            kind: self.query.kind,
            after_seq: self.after_seq,
            limit: self.query.page_size,
        };
        match self.query.store.list(&filter) {
            Ok(page) => {
                if page.len() < self.query.page_size {
                    self.exhausted = true;
                }
                if let Some(last) = page.last() {
                    self.after_seq = last.seq;
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e.into()))
            }
        }
    }
}
