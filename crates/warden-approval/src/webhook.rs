//! Webhook delivery of approval lifecycle notifications.

use std::time::Duration;

use reqwest::{blocking::Client, redirect::Policy};
use serde::Serialize;
use tracing::debug;

use warden_contracts::{
    approval::{NotificationKind, PendingApproval},
    error::NotifyError,
    event::Event,
};
use warden_core::traits::Notifier;

/// Default per-request timeout for webhook posts.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// The JSON body posted for every notification.
#[derive(Debug, Serialize)]
pub struct ApprovalNotification<'a> {
    pub kind: NotificationKind,
    pub approval: &'a PendingApproval,
    /// Seq of the ledger event recorded for this change, if any.
    pub event_seq: Option<u64>,
    pub event_hash: Option<&'a str>,
}

/// Posts notifications as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    /// Build a notifier for `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Build a notifier for `url`. Redirects are not followed.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError { reason: format!("cannot build http client: {e}") })?;
        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn notify(
        &self,
        approval: &PendingApproval,
        kind: NotificationKind,
        event: Option<&Event>,
    ) -> Result<(), NotifyError> {
        let body = ApprovalNotification {
            kind,
            approval,
            event_seq: event.map(|e| e.seq),
            event_hash: event.map(|e| e.hash.as_str()),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| NotifyError { reason: format!("POST {} failed: {e}", self.url) })?;

        if !response.status().is_success() {
            return Err(NotifyError {
                reason: format!("POST {} returned http status {}", self.url, response.status()),
            });
        }
        debug!(approval_id = %approval.id, url = %self.url, "approval notification delivered");
        Ok(())
    }
}
