//! Classifier. Decides NEW vs EXISTING from the subject line.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::context::Path;
use crate::llm::LlmClient;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub path: Path,
    pub ticket_id: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmClassification {
    present: bool,
    path: String,
    ticket_id: Option<String>,
    confidence: f64,
    #[allow(dead_code)]
    notes: Option<String>,
}

pub fn ticket_regex(install_prefix: &str) -> Regex {
    let pattern = format!(r"(?i){}-\d{{8}}-\d{{4}}", regex::escape(install_prefix));
    Regex::new(&pattern).expect("classifier ticket pattern is statically valid")
}

/// Strips bracket wrapping and reply/forward subject prefixes before
/// matching ("after collapsing brackets and reply/forward
/// prefixes").
fn collapse_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let stripped = ["re:", "fw:", "fwd:"]
            .iter()
            .find_map(|prefix| lower.strip_prefix(prefix).map(|_| s[prefix.len()..].trim_start()));
        match stripped {
            Some(next) => s = next,
            None => break,
        }
    }
    s.replace(['[', ']'], "")
}

fn regex_fallback(subject: &str, regex: &Regex) -> ClassificationResult {
    let collapsed = collapse_subject(subject);
    match regex.find(&collapsed) {
        Some(m) => ClassificationResult {
            path: Path::Existing,
            ticket_id: Some(m.as_str().to_owned()),
            confidence: 0.8,
        },
        None => ClassificationResult {
            path: Path::New,
            ticket_id: None,
            confidence: 0.7,
        },
    }
}

fn classification_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "present": {"type": "boolean"},
            "path": {"type": "string", "enum": ["NEW", "EXISTING"]},
            "ticket_id": {"type": ["string", "null"]},
            "confidence": {"type": "number"},
            "notes": {"type": ["string", "null"]}
        },
        "required": ["present", "path", "confidence"]
    })
}

pub async fn classify(subject: &str, llm: Option<&dyn LlmClient>, install_prefix: &str, deadline: Duration) -> ClassificationResult {
    let regex = ticket_regex(install_prefix);

    let Some(llm) = llm else {
        return regex_fallback(subject, &regex);
    };

    let system_prompt = "You classify inbound support emails as NEW or EXISTING based on their subject line.";
    let user_prompt = format!("Subject: {subject}");

    match llm.call(system_prompt, &user_prompt, classification_schema(), deadline).await {
        Ok(value) => match serde_json::from_value::<LlmClassification>(value) {
            Ok(parsed) if (0.0..=1.0).contains(&parsed.confidence) => ClassificationResult {
                path: if parsed.path.eq_ignore_ascii_case("EXISTING") {
                    Path::Existing
                } else {
                    Path::New
                },
                ticket_id: parsed.ticket_id,
                confidence: parsed.confidence,
            },
            _ => regex_fallback(subject, &regex),
        },
        Err(_) => regex_fallback(subject, &regex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_detects_ticket_in_subject() {
        let result = classify("ARG-20250603-0007 follow-up", None, "ARG", Duration::from_secs(1)).await;
        assert_eq!(result.path, Path::Existing);
        assert_eq!(result.ticket_id.as_deref(), Some("ARG-20250603-0007"));
        assert_eq!(result.confidence, 0.8);
    }

    #[tokio::test]
    async fn fallback_with_no_ticket_is_new() {
        let result = classify("Holiday policy question", None, "ARG", Duration::from_secs(1)).await;
        assert_eq!(result.path, Path::New);
        assert_eq!(result.ticket_id, None);
        assert_eq!(result.confidence, 0.7);
    }

    #[tokio::test]
    async fn fallback_collapses_reply_prefix_and_brackets() {
        let result = classify(
            "Re: [ARG-20250603-0001] Holiday policy question",
            None,
            "ARG",
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result.ticket_id.as_deref(), Some("ARG-20250603-0001"));
    }

    #[test]
    fn regex_is_case_insensitive() {
        let re = ticket_regex("ARG");
        assert!(re.is_match("arg-20250603-0001"));
    }
}
