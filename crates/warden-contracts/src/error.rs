//! Error types for the WARDEN governance core.
//!
//! Each component has its own error enum so callers can match on exactly the
//! failures that component produces. `WardenError` unifies them for the
//! gateway and the command-line surface.
//!
//! `NoMatchingPolicy` is deliberately absent: a request no policy covers gets
//! a `VerdictEffect::NoMatch` verdict, not an error.

use thiserror::Error;

/// Failures of a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached. Transient; callers may retry.
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// No record exists under the requested key.
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// A stored event could not be decoded.
    #[error("stored event {seq} is corrupt: {reason}")]
    Corrupt { seq: u64, reason: String },

    /// A write raced another writer (e.g. duplicate sequence number).
    #[error("write conflict: {reason}")]
    Conflict { reason: String },

    /// The backend only supports reads.
    #[error("storage backend '{backend}' is read-only")]
    ReadOnly { backend: String },

    /// Any other backend failure.
    #[error("storage backend error: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Failures of the audit ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A submitted event is malformed or missing a required field.
    /// Nothing was appended.
    #[error("invalid {kind} event: {reason}")]
    InvalidEvent { kind: String, reason: String },

    /// Stored history no longer matches its hashes. Never auto-repaired.
    #[error("chain integrity violated at seq {seq}: {reason}")]
    ChainIntegrity { seq: u64, reason: String },

    /// `append` was called after `close`.
    #[error("ledger is closed")]
    LedgerClosed,

    /// A verification pass was cancelled by its caller.
    #[error("verification cancelled after {checked} event(s)")]
    Cancelled { checked: u64 },

    /// A verification pass exceeded its deadline.
    #[error("verification timed out after {checked} event(s)")]
    TimedOut { checked: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the approval manager.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No approval exists under this id.
    #[error("approval '{id}' not found")]
    NotFound { id: String },

    /// The approval already left `Pending`.
    #[error("approval '{id}' already resolved as {status}")]
    AlreadyResolved { id: String, status: String },

    /// `expire` was called before the TTL elapsed.
    #[error("approval '{id}' has not reached its expiry")]
    NotExpired { id: String },

    /// The verdict does not require approval.
    #[error("verdict does not require approval")]
    NotApprovalRequired,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures loading or validating policies.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy source could not be read, or held no policies.
    #[error("failed to load policies: {reason}")]
    Load { reason: String },

    /// The policy document is not valid TOML for the schema.
    #[error("failed to parse policy TOML: {reason}")]
    Parse { reason: String },

    /// A policy failed semantic validation.
    #[error("policy '{policy_id}' is invalid: {reason}")]
    Invalid { policy_id: String, reason: String },
}

/// Failure of a best-effort notification.
#[derive(Debug, Error)]
#[error("notification failed: {reason}")]
pub struct NotifyError {
    pub reason: String,
}

/// The unified error type for the gateway and CLI.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tool runner failed to execute an allowed invocation.
    #[error("tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the WARDEN crates.
pub type WardenResult<T> = Result<T, WardenError>;
