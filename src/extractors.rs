//! Extractors. Two LLM-backed extractors, each with a deterministic
//! fallback; neither is allowed to fail the pipeline.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::llm::LlmClient;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderName {
    pub full_name: Option<String>,
    pub first: String,
    pub last: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmSenderName {
    full_name: Option<String>,
    first: Option<String>,
    last: Option<String>,
    confidence: f64,
}

fn sender_name_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "full_name": {"type": ["string", "null"]},
            "first": {"type": ["string", "null"]},
            "last": {"type": ["string", "null"]},
            "confidence": {"type": "number"}
        },
        "required": ["confidence"]
    })
}

/// Local-part of `from_addr`, split on `.`/`_`, title-cased.
fn sender_name_fallback(from_addr: &str) -> SenderName {
    let local = from_addr.split('@').next().unwrap_or(from_addr);
    let parts: Vec<&str> = local.split(['.', '_']).filter(|p| !p.is_empty()).collect();
    let title = |s: &str| {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };

    match parts.as_slice() {
        [] => SenderName::default(),
        [first] => SenderName {
            full_name: Some(title(first)),
            first: title(first),
            last: String::new(),
            confidence: 0.0,
        },
        [first, rest @ ..] => {
            let last = rest.last().map(|s| title(s)).unwrap_or_default();
            SenderName {
                full_name: Some(format!("{} {}", title(first), last)),
                first: title(first),
                last,
                confidence: 0.0,
            }
        }
    }
}

pub async fn extract_sender_name(body: &str, from_addr: &str, llm: Option<&dyn LlmClient>, deadline: Duration) -> SenderName {
    let Some(llm) = llm else {
        return sender_name_fallback(from_addr);
    };

    let system_prompt = "Extract the sender's display name from the body of a customer email.";
    let result = llm
        .call(system_prompt, body, sender_name_schema(), deadline)
        .await
        .ok()
        .and_then(|value| serde_json::from_value::<LlmSenderName>(value).ok());

    match result {
        Some(parsed) => SenderName {
            full_name: parsed.full_name,
            first: parsed.first.unwrap_or_default(),
            last: parsed.last.unwrap_or_default(),
            confidence: parsed.confidence,
        },
        None => sender_name_fallback(from_addr),
    }
}

#[derive(Debug, Deserialize)]
struct LlmOrgName {
    org_name: Option<String>,
}

fn org_name_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {"org_name": {"type": ["string", "null"]}}
    })
}

pub async fn extract_org_name(body: &str, llm: Option<&dyn LlmClient>, deadline: Duration) -> String {
    let Some(llm) = llm else {
        return String::new();
    };

    let system_prompt = "Extract the sender's organization name from the body of a customer email, if mentioned.";
    llm.call(system_prompt, body, org_name_schema(), deadline)
        .await
        .ok()
        .and_then(|value| serde_json::from_value::<LlmOrgName>(value).ok())
        .and_then(|parsed| parsed.org_name)
        .unwrap_or_default()
}
