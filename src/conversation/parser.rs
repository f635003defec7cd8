//! Conversation Parser. Decomposes a raw email body into an ordered
//! list of Conversation Entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use crate::conversation::entry::ConversationEntry;
use crate::llm::LlmClient;

pub fn format_sender_datetime(received_at: DateTime<Utc>, tz: Tz) -> String {
    received_at.with_timezone(&tz).format("%d/%m/%Y %H:%M %Z").to_string()
}

#[derive(Debug, Deserialize)]
struct LlmEntry {
    sender_email: Option<String>,
    sender_name: Option<String>,
    sender_datetime: Option<String>,
    content: String,
}

fn parser_schema() -> serde_json::Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "sender_email": {"type": ["string", "null"]},
                "sender_name": {"type": ["string", "null"]},
                "sender_datetime": {"type": ["string", "null"]},
                "content": {"type": "string"}
            },
            "required": ["content"]
        }
    })
}

fn synthetic_entry(body: &str, from_addr: &str, received_at: DateTime<Utc>, tz: Tz) -> ConversationEntry {
    ConversationEntry {
        sender_email: from_addr.to_owned(),
        sender_name: String::new(),
        sender_datetime: format_sender_datetime(received_at, tz),
        content: body.trim().to_owned(),
        order: 1,
    }
}

pub async fn parse(
    body: &str,
    from_addr: &str,
    received_at: DateTime<Utc>,
    tz: Tz,
    llm: Option<&dyn LlmClient>,
    deadline: Duration,
) -> Vec<ConversationEntry> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let Some(llm) = llm else {
        return vec![synthetic_entry(body, from_addr, received_at, tz)];
    };

    let system_prompt = "Decompose this email body into an ordered list of distinct conversation entries. \
        Do not emit the live query block, only the quoted history beneath it. Each distinct forwarded or \
        quoted block is its own entry. If only a display name is available, synthesize name@unknown for \
        sender_email.";

    let result = llm
        .call(system_prompt, body, parser_schema(), deadline)
        .await
        .ok()
        .and_then(|value| serde_json::from_value::<Vec<LlmEntry>>(value).ok());

    match result {
        Some(entries) if !entries.is_empty() => entries
            .into_iter()
            .enumerate()
            .map(|(idx, e)| ConversationEntry {
                sender_email: e.sender_email.unwrap_or_else(|| "name@unknown".to_owned()),
                sender_name: e.sender_name.unwrap_or_default(),
                sender_datetime: e.sender_datetime.unwrap_or_else(|| format_sender_datetime(received_at, tz)),
                content: e.content,
                order: idx as u32 + 1,
            })
            .collect(),
        _ => vec![synthetic_entry(body, from_addr, received_at, tz)],
    }
}
