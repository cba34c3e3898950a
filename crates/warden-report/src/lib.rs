//! # warden-report
//!
//! The read-only compliance reporter for WARDEN.
//!
//! ## Overview
//!
//! [`ComplianceReporter`] scans the window `[now - lookback, now]` and runs
//! nine phases in a fixed order:
//!
//! 1. governance snapshot
//! 2. policy overview
//! 3. event tally
//! 4. decision matrix and blocked requests
//! 5. enforcement coverage
//! 6. pending approvals
//! 7. full-ledger integrity
//! 8. mutation activity against the prior window
//! 9. overall status
//!
//! A phase whose source fails (after retries) is marked unavailable and the
//! rest still run. The status tier doubles as the process exit code:
//! `0` OK, `1` DEGRADED, `2` ALERTS, `3` CHAIN_INVALID.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_report::{render_text, ComplianceReporter, ReportOptions};
//!
//! let reporter = ComplianceReporter::new(store, ReportOptions::default())
//!     .with_policies(policies)
//!     .with_approvals(approvals);
//! let report = reporter.run();
//! print!("{}", render_text(&report));
//! std::process::exit(report.exit_code());
//! ```

pub mod config;
pub mod gateway;
pub mod phases;
pub mod publish;
pub mod render;
pub mod report;
pub mod reporter;
pub mod retry;
pub mod status;

pub use config::{parse_duration, ReporterConfig};
pub use gateway::GatewayClient;
pub use publish::ReportPublisher;
pub use render::{render_json, render_text};
pub use report::{ComplianceReport, PhaseOutcome, PHASES};
pub use reporter::{ComplianceReporter, ReportOptions};
pub use retry::RetryPolicy;
pub use status::{ReportStatus, StatusSummary};

// ── Tests ─────────────────────────────────────────────────────────────────────
