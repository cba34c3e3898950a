//! # warden-core
//!
//! The trait seams and the policy-bound tool gateway for WARDEN.
//!
//! This crate provides:
//! - The component traits (`DecisionEngine`, `AuditSink`, `ApprovalQueue`,
//!   `ToolRunner`) and the storage seams (`EventStore`, `ApprovalStore`,
//!   `PendingApprovalSource`, `Notifier`)
//! - The `Gateway` that wires them together in the correct trust order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_core::{Gateway, traits::{DecisionEngine, AuditSink, ApprovalQueue, ToolRunner}};
//! ```

pub mod gateway;
pub mod traits;

pub use gateway::{Gateway, InvocationResult};
