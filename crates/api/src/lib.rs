//! Levy API façade: the remote-source boundary the monitor and CLI depend on.
//!
//! `HttpApi` talks to the ticket, patron and manifest endpoints (or a local test
//! data file); `MockApi` scripts the same surface for tests.

#![forbid(unsafe_code)]

use levy_core::{AppManifest, PatronRecord, PushMessage, TicketPage};
use serde::{Deserialize, Serialize};

pub mod config;
mod http;
mod mock;
mod patron;

pub use config::ApiConfig;
pub use http::HttpApi;
pub use mock::MockApi;
pub use patron::{PatronService, ERROR_TEXT, NO_INFO_TEXT};

/// API errors. The fetch layer reports them; callers pick the recovery policy.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LevyError {
    #[error("config: {0}")]
    Config(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("cancelled")]
    Cancelled,
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("capability: {0}")]
    Capability(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl LevyError {
    pub fn is_cancelled(&self) -> bool { matches!(self, LevyError::Cancelled) }
}

impl From<reqwest::Error> for LevyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LevyError::Timeout(e.to_string())
        } else if e.is_decode() {
            LevyError::Decode(e.to_string())
        } else if let Some(s) = e.status() {
            LevyError::Status { code: s.as_u16(), body: e.to_string() }
        } else {
            LevyError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for LevyError {
    fn from(e: serde_json::Error) -> Self { LevyError::Decode(e.to_string()) }
}

pub type LevyResult<T> = Result<T, LevyError>;

/// Remote source surface.
#[async_trait::async_trait]
pub trait LevyApi: Send + Sync {
    /// Paged ticket fetch. A full reload asks for page 1, size 50000, filter `All`.
    async fn fetch_tickets(&self, page_index: i64, page_size: i64, filter_type: &str) -> LevyResult<TicketPage>;

    /// Patron profile by player id; `Ok(None)` when the source has no usable record.
    async fn fetch_patron(&self, patron_id: i64) -> LevyResult<Option<PatronRecord>>;

    /// Latest deployed manifest for an application code.
    async fn fetch_manifest(&self, app_code: &str) -> LevyResult<Option<AppManifest>>;

    /// Cheap reachability check against the API host.
    async fn probe_network(&self) -> bool;

    /// Open the push channel. Fails with `Capability` when no push endpoint is configured.
    async fn subscribe_push(&self) -> LevyResult<StreamHandle<PushMessage>>;
}

// ----------------- Streaming primitives -----------------

/// Cancellation handle that stops the producer task.
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
    token: Option<tokio_util::sync::CancellationToken>,
}

impl CancelHandle {
    pub fn new(task: Option<tokio::task::JoinHandle<()>>, token: Option<tokio_util::sync::CancellationToken>) -> Self {
        Self { task, token }
    }

    pub fn noop() -> Self { Self { task: None, token: None } }

    pub fn cancel(mut self) {
        if let Some(t) = self.token.take() {
            t.cancel();
        }
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

/// Generic stream handle used by streaming endpoints.
pub struct StreamHandle<T> {
    pub rx: tokio::sync::mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}
