//! # warden-contracts
//!
//! Shared types, event payloads, and error contracts for the WARDEN
//! governance core.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions and error types.

pub mod approval;
pub mod error;
pub mod event;
pub mod policy;
pub mod request;
