//! Postgres-backed `StoreAdapter`. The vendor-specific
//! filter-by-formula semantics of the real external document store —
//! equality on `ticket_id`, prefix match for date-based allocation
//! queries — are expressed here as ordinary SQL predicates; nothing above
//! this module knows it is talking to Postgres.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::conversation::entry::ConversationEntry;
use crate::ratelimit::WriteRateLimiter;
use crate::store::{StoreAdapter, StoreError, TicketPatch, TicketRecord, TicketStatus};

pub struct PgStore {
    pool: PgPool,
    write_limiter: WriteRateLimiter,
}

impl PgStore {
    pub fn new(pool: PgPool, writes_per_second: u32) -> Self {
        Self {
            pool,
            write_limiter: WriteRateLimiter::new(writes_per_second),
        }
    }
}

fn status_to_str(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::New => "new",
        TicketStatus::AwaitingClient => "awaiting_client",
        TicketStatus::AwaitingAgent => "awaiting_agent",
        TicketStatus::Resolved => "resolved",
        TicketStatus::Closed => "closed",
    }
}

fn status_from_str(raw: &str) -> TicketStatus {
    match raw {
        "awaiting_client" => TicketStatus::AwaitingClient,
        "awaiting_agent" => TicketStatus::AwaitingAgent,
        "resolved" => TicketStatus::Resolved,
        "closed" => TicketStatus::Closed,
        _ => TicketStatus::New,
    }
}

fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(db_err.message().to_owned());
        }
    }
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(err.to_string()),
        other => StoreError::Fatal(other.to_string()),
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<TicketRecord, StoreError> {
    let initial_entry: sqlx::types::Json<ConversationEntry> =
        row.try_get("initial_entry").map_err(|e| StoreError::Fatal(e.to_string()))?;
    let history: sqlx::types::Json<Vec<ConversationEntry>> =
        row.try_get("history").map_err(|e| StoreError::Fatal(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StoreError::Fatal(e.to_string()))?;

    Ok(TicketRecord {
        ticket_id: row.try_get("ticket_id").map_err(|e| StoreError::Fatal(e.to_string()))?,
        status: status_from_str(&status),
        created_at: row.try_get("created_at").map_err(|e| StoreError::Fatal(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| StoreError::Fatal(e.to_string()))?,
        subject: row.try_get("subject").map_err(|e| StoreError::Fatal(e.to_string()))?,
        body: row.try_get("body").map_err(|e| StoreError::Fatal(e.to_string()))?,
        from_addr: row.try_get("from_addr").map_err(|e| StoreError::Fatal(e.to_string()))?,
        sender_first: row.try_get("sender_first").map_err(|e| StoreError::Fatal(e.to_string()))?,
        sender_last: row.try_get("sender_last").map_err(|e| StoreError::Fatal(e.to_string()))?,
        org_name: row.try_get("org_name").map_err(|e| StoreError::Fatal(e.to_string()))?,
        initial_entry: initial_entry.0,
        history: history.0,
        raw_headers: row.try_get("raw_headers").map_err(|e| StoreError::Fatal(e.to_string()))?,
        ack_sent: row.try_get("ack_sent").map_err(|e| StoreError::Fatal(e.to_string()))?,
        spf: row.try_get("spf").map_err(|e| StoreError::Fatal(e.to_string()))?,
        dkim: row.try_get("dkim").map_err(|e| StoreError::Fatal(e.to_string()))?,
        has_attachments: row.try_get("has_attachments").map_err(|e| StoreError::Fatal(e.to_string()))?,
        attachment_count: row.try_get("attachment_count").map_err(|e| StoreError::Fatal(e.to_string()))?,
    })
}

#[async_trait]
impl StoreAdapter for PgStore {
    async fn find_by_ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tickets WHERE ticket_id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_by_date_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT ticket_id FROM tickets WHERE ticket_id LIKE $1 ORDER BY ticket_id")
            .bind(format!("{prefix}%"))
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.get("ticket_id")).collect())
    }

    async fn create(&self, record: &TicketRecord) -> Result<(), StoreError> {
        self.write_limiter.acquire().await.map_err(|e| StoreError::Transient(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO tickets
                (ticket_id, status, created_at, updated_at, subject, body, from_addr,
                 sender_first, sender_last, org_name, initial_entry, history, raw_headers,
                 ack_sent, spf, dkim, has_attachments, attachment_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"#,
        )
        .bind(&record.ticket_id)
        .bind(status_to_str(record.status))
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(&record.from_addr)
        .bind(&record.sender_first)
        .bind(&record.sender_last)
        .bind(&record.org_name)
        .bind(sqlx::types::Json(&record.initial_entry))
        .bind(sqlx::types::Json(&record.history))
        .bind(&record.raw_headers)
        .bind(record.ack_sent)
        .bind(&record.spf)
        .bind(&record.dkim)
        .bind(record.has_attachments)
        .bind(record.attachment_count)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    async fn update(&self, ticket_id: &str, patch: &TicketPatch) -> Result<(), StoreError> {
        self.write_limiter.acquire().await.map_err(|e| StoreError::Transient(e.to_string()))?;

        if let Some(history) = &patch.history {
            sqlx::query("UPDATE tickets SET history = $1, updated_at = now() WHERE ticket_id = $2")
                .bind(sqlx::types::Json(history))
                .bind(ticket_id)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
        }
        if let Some(raw_headers) = &patch.raw_headers {
            sqlx::query("UPDATE tickets SET raw_headers = $1, updated_at = now() WHERE ticket_id = $2")
                .bind(raw_headers)
                .bind(ticket_id)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
        }
        if let Some(status) = patch.status {
            sqlx::query("UPDATE tickets SET status = $1, updated_at = now() WHERE ticket_id = $2")
                .bind(status_to_str(status))
                .bind(ticket_id)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
        }
        Ok(())
    }

    async fn update_flag(&self, ticket_id: &str, field: &str, value: bool) -> Result<(), StoreError> {
        self.write_limiter.acquire().await.map_err(|e| StoreError::Transient(e.to_string()))?;

        if field != "ack_sent" {
            return Err(StoreError::Fatal(format!("unsupported flag field: {field}")));
        }

        sqlx::query("UPDATE tickets SET ack_sent = $1, updated_at = now() WHERE ticket_id = $2")
            .bind(value)
            .bind(ticket_id)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        Ok(())
    }
}
