//! Posting a finished report to a webhook.

use std::time::Duration;

use reqwest::{blocking::Client, redirect::Policy};
use tracing::{info, warn};

use warden_contracts::error::NotifyError;

use crate::report::ComplianceReport;

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends the JSON report to one URL.
#[derive(Debug, Clone)]
pub struct ReportPublisher {
    url: String,
    client: Client,
}

impl ReportPublisher {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(url, DEFAULT_PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError { reason: format!("cannot build HTTP client: {e}") })?;
        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `report`. With `dry_run` nothing is sent.
    pub fn publish(&self, report: &ComplianceReport, dry_run: bool) -> Result<(), NotifyError> {
        if dry_run {
            info!(url = %self.url, "dry run; report not published");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .map_err(|e| NotifyError { reason: format!("{}: {e}", self.url) })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "report webhook rejected the report");
            return Err(NotifyError {
                reason: format!("{} returned {status}", self.url),
            });
        }
        info!(url = %self.url, status = %report.status.status, "report published");
        Ok(())
    }
}
