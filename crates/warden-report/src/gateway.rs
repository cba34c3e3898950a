//! Read-only HTTP client for a WARDEN gateway.
//!
//! Lets the reporter audit a ledger it cannot open directly. Endpoints:
//!
//! | Method | Path                          | Body                      |
//! |--------|-------------------------------|---------------------------|
//! | GET    | `/v1/ledger/events`           | `[Event]`                 |
//! | GET    | `/v1/ledger/events/{seq}`     | `Event`                   |
//! | GET    | `/v1/ledger/count`            | `{"count": n}`            |
//! | GET    | `/v1/approvals/pending`       | `[PendingApproval]`       |
//!
//! `/v1/ledger/events` accepts `since`, `type`, `after_seq`, and `limit`
//! query parameters with `EventFilter` semantics.

use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::{blocking::Client, redirect::Policy, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use warden_contracts::{approval::PendingApproval, error::StoreError, event::Event};
use warden_core::traits::{EventFilter, EventStore, PendingApprovalSource};

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CountBody {
    count: u64,
}

/// An `EventStore` and `PendingApprovalSource` backed by gateway HTTP calls.
///
/// `append` always fails with `ReadOnly`: the reporter never writes.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    client: Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, DEFAULT_GATEWAY_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend {
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, StoreError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "gateway request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&url, status));
        }
        response.json::<T>().map_err(|e| StoreError::Backend {
            reason: format!("malformed response from {url}: {e}"),
        })
    }
}

/// Network failures are transient; anything the client itself got wrong is not.
fn classify(url: &str, err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        StoreError::Unavailable { reason: format!("{url}: {err}") }
    } else {
        StoreError::Backend { reason: format!("{url}: {err}") }
    }
}

fn status_error(url: &str, status: StatusCode) -> StoreError {
    if status == StatusCode::NOT_FOUND {
        StoreError::NotFound { key: url.to_string() }
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StoreError::Unavailable { reason: format!("{url} returned {status}") }
    } else {
        StoreError::Backend { reason: format!("{url} returned {status}") }
    }
}

fn filter_query(filter: &EventFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("since", filter.since.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        ("after_seq", filter.after_seq.to_string()),
        ("limit", filter.limit.to_string()),
    ];
    if let Some(kind) = filter.kind {
        query.push(("type", kind.as_str().to_string()));
    }
    query
}

impl EventStore for GatewayClient {
    fn backend(&self) -> String {
        format!("gateway:{}", self.base_url)
    }

    fn append(&self, _event: &Event) -> Result<Event, StoreError> {
        Err(StoreError::ReadOnly { backend: self.backend() })
    }

    fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        self.fetch("/v1/ledger/events", &filter_query(filter))
    }

    fn get(&self, seq: u64) -> Result<Event, StoreError> {
        self.fetch(&format!("/v1/ledger/events/{seq}"), &[])
    }

    fn count(&self) -> Result<u64, StoreError> {
        let body: CountBody = self.fetch("/v1/ledger/count", &[])?;
        Ok(body.count)
    }

    fn last(&self) -> Result<Option<Event>, StoreError> {
        match self.count()? {
            0 => Ok(None),
            n => self.get(n).map(Some),
        }
    }
}

impl PendingApprovalSource for GatewayClient {
    fn pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        self.fetch("/v1/approvals/pending", &[])
    }
}
