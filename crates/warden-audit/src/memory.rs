//! In-memory implementation of `EventStore`.
//!
//! `InMemoryEventStore` keeps every event in a `Vec` behind an `RwLock`, so
//! readers run concurrently with each other and never observe a half-pushed
//! event. It is the reference backend for tests and single-process runs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use warden_contracts::{error::StoreError, event::Event};
use warden_core::traits::{EventFilter, EventStore};

/// A volatile, process-local event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
    offline: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the stored event at `seq` in place, bypassing the ledger.
    ///
    /// Nothing in the append path calls this. It exists for integrity drills:
    /// the next `Ledger::verify` must flag `seq`.
    pub fn tamper_with(&self, seq: u64, edit: impl FnOnce(&mut Event)) -> Result<(), StoreError> {
        let mut events = self.write()?;
        let event = index(seq)
            .and_then(|i| events.get_mut(i))
            .ok_or_else(|| StoreError::NotFound { key: format!("seq {seq}") })?;
        edit(event);
        Ok(())
    }

    /// Remove the event at `seq`, bypassing the ledger.
    pub fn delete(&self, seq: u64) -> Result<Event, StoreError> {
        let mut events = self.write()?;
        match index(seq) {
            Some(i) if i < events.len() => Ok(events.remove(i)),
            _ => Err(StoreError::NotFound { key: format!("seq {seq}") }),
        }
    }

    /// Simulate an outage: while offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "in-memory store is offline".to_string(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Event>>, StoreError> {
        self.check_online()?;
        self.events.read().map_err(|e| StoreError::Backend {
            reason: format!("event store lock poisoned: {e}"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Event>>, StoreError> {
        self.check_online()?;
        self.events.write().map_err(|e| StoreError::Backend {
            reason: format!("event store lock poisoned: {e}"),
        })
    }
}

fn index(seq: u64) -> Option<usize> {
    seq.checked_sub(1).map(|i| i as usize)
}

impl EventStore for InMemoryEventStore {
    fn backend(&self) -> String {
        "memory".to_string()
    }

    fn append(&self, event: &Event) -> Result<Event, StoreError> {
        let mut events = self.write()?;
        let last = events.last().map(|e| e.seq).unwrap_or(0);
        if event.seq != last + 1 {
            return Err(StoreError::Conflict {
                reason: format!("append of seq {} but head is {}", event.seq, last),
            });
        }
        events.push(event.clone());
        Ok(event.clone())
    }

    fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let events = self.read()?;
        // Tampering may have removed events, so locate by seq rather than index.
        let start = events.partition_point(|e| e.seq <= filter.after_seq);
        Ok(events[start..]
            .iter()
            .filter(|e| e.timestamp >= filter.since)
            .filter(|e| filter.kind.map_or(true, |k| e.kind() == k))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    fn get(&self, seq: u64) -> Result<Event, StoreError> {
        let events = self.read()?;
        events
            .iter()
            .find(|e| e.seq == seq)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: format!("seq {seq}") })
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.len() as u64)
    }

    fn last(&self) -> Result<Option<Event>, StoreError> {
        Ok(self.read()?.last().cloned())
    }
}
