//! Context Builder. Assembles a `ContextRecord` from the decoded wire
//! field map and is mutated in place by later stages of the orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    New,
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Received,
    Decoded,
    ContextBuilt,
    DedupChecked,
    LoopChecked,
    Classified,
    TicketAllocated,
    Extracted,
    Stored,
    RecordFetched,
    Parsed,
    Merged,
    Updated,
    AckSent,
    StatusUpdated,
    Done,
}

#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub subject: String,
    pub text_body: String,
    pub from_raw: String,
    pub from_addr: String,
    pub to_addr: String,
    pub headers_blob: String,
    pub message_id: String,
    pub spf: String,
    pub dkim: String,
    pub has_attachments: bool,
    pub attachment_count: u32,
    pub received_at: DateTime<Utc>,
    pub ticket_id: Option<String>,
    pub path: Option<Path>,
    pub processing_status: ProcessingStatus,
    /// Parsed `envelope.from`, when the wire payload carried one — used by
    /// the Loop Guard.
    pub envelope_from: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextBuildError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

pub fn build(fields: &HashMap<String, String>, received_at: DateTime<Utc>) -> Result<ContextRecord, ContextBuildError> {
    let to_raw = fields.get("to").ok_or(ContextBuildError::MissingField("to"))?;
    let from_raw = fields
        .get("from")
        .ok_or(ContextBuildError::MissingField("from"))?
        .clone();

    let to_addr = extract_addr_spec(to_raw);
    let from_addr = extract_addr_spec(&from_raw).to_lowercase();

    let subject = fields.get("subject").cloned().unwrap_or_default();
    let text_body = fields.get("text").cloned().unwrap_or_default();
    let headers_blob = fields.get("headers").cloned().unwrap_or_default();
    let spf = fields.get("SPF").cloned().unwrap_or_default();
    let dkim = fields.get("dkim").cloned().unwrap_or_default();

    let (has_attachments, attachment_count) = match fields.get("attachments") {
        Some(raw) => {
            let count = raw.trim().parse::<u32>().unwrap_or(0);
            (count > 0, count)
        }
        None => (false, 0),
    };

    let message_id = extract_message_id(&headers_blob).unwrap_or_else(|| "unknown".to_owned());

    let envelope_from = fields
        .get("envelope")
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|v| v.get("from").and_then(|f| f.as_str()).map(str::to_lowercase));

    Ok(ContextRecord {
        subject,
        text_body,
        from_raw,
        from_addr,
        to_addr,
        headers_blob,
        message_id,
        spf,
        dkim,
        has_attachments,
        attachment_count,
        received_at,
        ticket_id: None,
        path: None,
        processing_status: ProcessingStatus::ContextBuilt,
        envelope_from,
    })
}

/// Locates the last `<...>` pair in `raw` and returns its contents; falls
/// back to stripping surrounding quotes when no angle brackets are present.
pub fn extract_addr_spec(raw: &str) -> String {
    if let (Some(start), Some(end)) = (raw.rfind('<'), raw.rfind('>')) {
        if start < end {
            return raw[start + 1..end].trim().to_owned();
        }
    }
    raw.trim().trim_matches('"').trim().to_owned()
}

/// Case-insensitive scan for a `Message-Id:` / `Message-ID:` header line.
pub fn extract_message_id(headers_blob: &str) -> Option<String> {
    for line in headers_blob.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("message-id:") {
            let offset = line.len() - rest.len();
            return Some(line[offset..].trim().to_owned());
        }
    }
    None
}
