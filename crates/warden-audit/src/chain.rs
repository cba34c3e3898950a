//! Hash-chain primitives: hashing and incremental chain checking.
//!
//! Hash input layout (bytes, in order):
//!   1. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   2. canonical JSON of the payload (serde_json, compact, maps key-sorted)
//!   3. seq as 8-byte little-endian
//!   4. timestamp as RFC 3339 with nanoseconds and a `Z` suffix
//!
//! Every field that contributes to an event's hash is listed explicitly so
//! nothing is accidentally omitted.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use warden_contracts::{
    error::LedgerError,
    event::{Event, EventPayload},
};

/// Compute the SHA-256 hash of one event. Returns lowercase hex.
pub fn hash_event(
    prev_hash: &str,
    payload: &EventPayload,
    seq: u64,
    timestamp: &DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let payload_json = serde_json::to_vec(payload)?;

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(&payload_json);
    hasher.update(seq.to_le_bytes());
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// The outcome of a full-ledger integrity pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// True iff every examined event checked out.
    pub valid: bool,
    /// Events examined. On success this is the ledger length.
    pub total: u64,
    /// Sequence number of the first offending event.
    pub first_invalid: Option<u64>,
    /// Why `first_invalid` failed.
    pub reason: Option<String>,
    /// Hash of the last valid event, if any.
    pub head_hash: Option<String>,
}

impl ChainReport {
    /// The report itself when the chain checked out, otherwise
    /// `LedgerError::ChainIntegrity` at the first bad seq.
    pub fn into_result(self) -> Result<Self, LedgerError> {
        if self.valid {
            return Ok(self);
        }
        Err(LedgerError::ChainIntegrity {
            seq: self.first_invalid.unwrap_or(0),
            reason: self.reason.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Checks events one at a time, in ascending seq order.
///
/// Three rules per event: its seq is exactly one past the previous one
/// (starting at 1), its `prev_hash` equals the previous event's hash (or
/// `GENESIS_HASH`), and its stored hash equals the recomputed one.
#[derive(Debug, Clone)]
pub struct ChainWalker {
    expected_seq: u64,
    expected_prev: String,
    checked: u64,
}

impl Default for ChainWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainWalker {
    pub fn new() -> Self {
        Self {
            expected_seq: 1,
            expected_prev: Event::GENESIS_HASH.to_string(),
            checked: 0,
        }
    }

    /// Check the next event. Returns the failure reason on mismatch.
    pub fn check(&mut self, event: &Event) -> Result<(), String> {
        self.checked += 1;

        if event.seq != self.expected_seq {
            return Err(format!(
                "expected seq {} but found {} (event missing or reordered)",
                self.expected_seq, event.seq
            ));
        }
        if event.prev_hash != self.expected_prev {
            return Err("prev_hash does not match the predecessor's hash".to_string());
        }
        let recomputed = hash_event(&event.prev_hash, &event.payload, event.seq, &event.timestamp)
            .map_err(|e| format!("payload cannot be serialized: {e}"))?;
        if recomputed != event.hash {
            return Err("stored hash does not match recomputed hash".to_string());
        }

        self.expected_seq += 1;
        self.expected_prev = event.hash.clone();
        Ok(())
    }

    /// Events passed to `check` so far, including a failing one.
    pub fn checked(&self) -> u64 {
        self.checked
    }

    /// The seq the next event must carry.
    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Hash of the last event that checked out.
    pub fn head_hash(&self) -> Option<String> {
        (self.expected_seq > 1).then(|| self.expected_prev.clone())
    }

    /// A passing report for everything checked so far.
    pub fn valid_report(&self) -> ChainReport {
        ChainReport {
            valid: true,
            total: self.checked,
            first_invalid: None,
            reason: None,
            head_hash: self.head_hash(),
        }
    }

    /// A failing report naming `seq` as the first bad event.
    pub fn invalid_report(&self, seq: u64, reason: String) -> ChainReport {
        ChainReport {
            valid: false,
            total: self.checked,
            first_invalid: Some(seq),
            reason: Some(reason),
            head_hash: self.head_hash(),
        }
    }
}

/// Check a complete, in-memory slice of events.
pub fn verify_chain(events: &[Event]) -> ChainReport {
    let mut walker = ChainWalker::new();
    for event in events {
        if let Err(reason) = walker.check(event) {
            return walker.invalid_report(event.seq, reason);
        }
    }
    walker.valid_report()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use warden_contracts::event::ReasoningRecord;

    use super::*;

    fn reasoning(summary: &str) -> EventPayload {
        EventPayload::AgentReasoning(ReasoningRecord {
            trace_id: "t-1".to_string(),
            agent: "planner".to_string(),
            summary: summary.to_string(),
            details: json!({ "b": 2, "a": 1 }),
        })
    }

    fn chain(summaries: &[&str]) -> Vec<Event> {
        let mut prev = Event::GENESIS_HASH.to_string();
        let mut events = Vec::new();
        for (i, s) in summaries.iter().enumerate() {
            let seq = i as u64 + 1;
            let timestamp = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, seq as u32).unwrap();
            let payload = reasoning(s);
            let hash = hash_event(&prev, &payload, seq, &timestamp).unwrap();
            events.push(Event { seq, timestamp, payload, prev_hash: prev.clone(), hash: hash.clone() });
            prev = hash;
        }
        events
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = hash_event(Event::GENESIS_HASH, &reasoning("x"), 1, &ts).unwrap();
        let b = hash_event(Event::GENESIS_HASH, &reasoning("x"), 1, &ts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_commits_to_seq_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let base = hash_event(Event::GENESIS_HASH, &reasoning("x"), 1, &ts).unwrap();
        assert_ne!(base, hash_event(Event::GENESIS_HASH, &reasoning("x"), 2, &ts).unwrap());
        let later = ts + chrono::Duration::nanoseconds(1);
        assert_ne!(base, hash_event(Event::GENESIS_HASH, &reasoning("x"), 1, &later).unwrap());
    }

    #[test]
    fn test_untouched_chain_is_valid() {
        let events = chain(&["a", "b", "c"]);
        let report = verify_chain(&events);
        assert!(report.valid);
        assert_eq!(report.total, 3);
        assert_eq!(report.head_hash.as_deref(), Some(events[2].hash.as_str()));
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_chain(&[]);
        assert!(report.valid);
        assert_eq!(report.total, 0);
        assert!(report.head_hash.is_none());
    }

    #[test]
    fn test_edited_payload_fails_at_its_seq() {
        let mut events = chain(&["a", "b", "c"]);
        if let EventPayload::AgentReasoning(r) = &mut events[1].payload {
            r.summary = "rewritten".to_string();
        }
        let report = verify_chain(&events);
        assert!(!report.valid);
        assert_eq!(report.first_invalid, Some(2));
        assert_eq!(report.head_hash.as_deref(), Some(events[0].hash.as_str()));
    }

    #[test]
    fn test_deleted_event_is_detected() {
        let mut events = chain(&["a", "b", "c"]);
        events.remove(1);
        let report = verify_chain(&events);
        assert_eq!(report.first_invalid, Some(3));
        assert!(report.reason.unwrap().contains("expected seq 2"));
    }

    #[test]
    fn test_reordered_events_are_detected() {
        let mut events = chain(&["a", "b", "c"]);
        events.swap(0, 1);
        assert_eq!(verify_chain(&events).first_invalid, Some(2));
    }

    #[test]
    fn test_invalid_report_becomes_chain_integrity_error() {
        assert!(verify_chain(&chain(&["a", "b"])).into_result().is_ok());

        let mut events = chain(&["a", "b", "c"]);
        events[2].hash = "0".repeat(64);
        match verify_chain(&events).into_result() {
            Err(LedgerError::ChainIntegrity { seq, reason }) => {
                assert_eq!(seq, 3);
                assert!(reason.contains("recomputed"));
            }
            other => panic!("expected ChainIntegrity, got {:?}", other),
        }
    }
}
