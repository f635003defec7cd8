//! Store Adapter: the one place that knows how ticket records
//! are persisted. Everything above this module talks to the `StoreAdapter`
//! trait; the vendor-specific filter-formula semantics of the real external
//! store live entirely inside `postgres`.

pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::entry::ConversationEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    AwaitingClient,
    AwaitingAgent,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    pub from_addr: String,
    pub sender_first: String,
    pub sender_last: String,
    pub org_name: String,
    pub initial_entry: ConversationEntry,
    pub history: Vec<ConversationEntry>,
    pub raw_headers: String,
    pub ack_sent: bool,
    pub spf: String,
    pub dkim: String,
    pub has_attachments: bool,
    pub attachment_count: i32,
}

/// Fields an EXISTING-path update may change. `None` leaves the column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub history: Option<Vec<ConversationEntry>>,
    pub raw_headers: Option<String>,
    pub status: Option<TicketStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("ticket {0} already exists")]
    Conflict(String),
    #[error("ticket {0} not found")]
    NotFound(String),
    #[error("fatal store error: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn find_by_ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StoreError>;

    /// Ticket identifiers already allocated for the given `P-YYYYMMDD-`
    /// prefix, in no particular order. Implementations may paginate
    /// internally; callers only need the full set.
    async fn list_by_date_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn create(&self, record: &TicketRecord) -> Result<(), StoreError>;

    async fn update(&self, ticket_id: &str, patch: &TicketPatch) -> Result<(), StoreError>;

    async fn update_flag(&self, ticket_id: &str, field: &str, value: bool) -> Result<(), StoreError>;
}

/// Exponential-backoff retry for transient store failures: up
/// to 3 attempts, base 500ms, factor 2.0. Only `StoreError::Transient` is
/// retried; every other variant is returned immediately.
pub async fn retry_transient<F, Fut, T>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    const BASE_DELAY: Duration = Duration::from_millis(500);
    const FACTOR: f64 = 2.0;

    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(msg)) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(StoreError::Transient(msg));
                }
                let delay_ms = (BASE_DELAY.as_millis() as f64) * FACTOR.powi(attempt as i32 - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            Err(other) => return Err(other),
        }
    }
}
