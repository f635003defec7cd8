use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use call_log_ingest::config::AppConfig;
use call_log_ingest::conversation::ConversationEntry;
use call_log_ingest::error::LlmError;
use call_log_ingest::llm::LlmClient;
use call_log_ingest::store::{StoreAdapter, StoreError, TicketPatch, TicketRecord, TicketStatus};
use call_log_ingest::{http as app_http, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct FakeStore {
    records: Mutex<HashMap<String, TicketRecord>>,
}

#[async_trait]
impl StoreAdapter for FakeStore {
    async fn find_by_ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(ticket_id).cloned())
    }

    async fn list_by_date_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().unwrap().keys().filter(|id| id.starts_with(prefix)).cloned().collect())
    }

    async fn create(&self, record: &TicketRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.ticket_id) {
            return Err(StoreError::Conflict(record.ticket_id.clone()));
        }
        records.insert(record.ticket_id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, ticket_id: &str, patch: &TicketPatch) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(ticket_id).ok_or_else(|| StoreError::NotFound(ticket_id.to_owned()))?;
        if let Some(history) = &patch.history {
            record.history = history.clone();
        }
        if let Some(raw_headers) = &patch.raw_headers {
            record.raw_headers = raw_headers.clone();
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        Ok(())
    }

    async fn update_flag(&self, ticket_id: &str, field: &str, value: bool) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(ticket_id).ok_or_else(|| StoreError::NotFound(ticket_id.to_owned()))?;
        if field == "ack_sent" {
            record.ack_sent = value;
        }
        Ok(())
    }
}

/// Stands in for the real `HttpLlmClient`. Branches on the system prompt
/// each call site uses rather than inspecting the schema, since that's the
/// only thing distinguishing a classification call from a parser call.
struct FakeLlmClient {
    parse_response: Value,
}

impl FakeLlmClient {
    /// Classification always fails over to the regex fallback (every test
    /// subject here is regex-matchable); only the conversation-parse call
    /// returns a canned decomposition.
    fn for_parse(entries: Value) -> Self {
        Self { parse_response: entries }
    }

    fn failing_classifier() -> Self {
        Self { parse_response: json!([]) }
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn call(&self, system_prompt: &str, _user_prompt: &str, _schema: Value, _deadline: Duration) -> Result<Value, LlmError> {
        if system_prompt.starts_with("You classify") {
            return Err(LlmError::Http(503));
        }
        if system_prompt.starts_with("Decompose") {
            return Ok(self.parse_response.clone());
        }
        if system_prompt.starts_with("Extract the sender's display name") {
            return Ok(json!({"confidence": 0.0}));
        }
        if system_prompt.starts_with("Extract the sender's organization") {
            return Ok(json!({"org_name": null}));
        }
        Err(LlmError::Http(503))
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        install_prefix: "ARG".to_owned(),
        install_short_name: "Argan Advice".to_owned(),
        install_timezone: chrono_tz::Europe::London,
        outbound_from_addr: "advice@ops.example".to_owned(),
        outbound_cc_addr: "ops@ops.example".to_owned(),
        loop_guard_marker_phrase: "call logged".to_owned(),
        llm_enabled: false,
        llm_deadline_ms: 50,
        llm_model: String::new(),
        llm_endpoint: String::new(),
        llm_api_key: String::new(),
        store_deadline_ms: 10_000,
        store_write_qps: 100,
        mail_deadline_ms: 50,
        mail_retries: 3,
        mail_base_delay_ms: 1,
        mail_endpoint: "http://127.0.0.1:1".to_owned(),
        mail_api_key: "test".to_owned(),
        dedup_ttl_hours: 168,
        request_deadline_ms: 120_000,
        ack_template_text: "{greeting}, ref {ticket_id}".to_owned(),
        ack_template_html: "<p>{greeting}</p>".to_owned(),
        database_url: String::new(),
        bind_addr: "0.0.0.0:0".to_owned(),
        default_boundary: "xYzZY".to_owned(),
    }
}

fn multipart_body(fields: &[(&str, &str)]) -> Vec<u8> {
    let boundary = "xYzZY";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes());
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn make_state(store: Arc<FakeStore>) -> AppState {
    AppState::new(test_config(), store)
}

fn make_state_with_llm(store: Arc<FakeStore>, llm: FakeLlmClient) -> AppState {
    let mut state = AppState::new(test_config(), store);
    state.llm = Some(Arc::new(llm));
    state
}

async fn post_webhook(state: AppState, body: Vec<u8>) -> (StatusCode, String) {
    let router = app_http::build_router(state);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/inbound")
        .header("content-type", "multipart/form-data; boundary=xYzZY")
        .body(Body::from(body))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn s1_new_clean() {
    let store = Arc::new(FakeStore::default());
    let state = make_state(store.clone());
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "John Smith <js@client.example>"),
        ("subject", "Holiday policy question"),
        ("text", "Hi team, how many days of holiday do I get?"),
        ("attachments", "0"),
        ("headers", "Message-Id: <m1@client.example>"),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("accepted:"));

    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let record = records.values().next().unwrap();
    assert_eq!(record.status, TicketStatus::New);
    assert_eq!(record.from_addr, "js@client.example");
    assert_eq!(record.sender_first, "John");
    assert!(record.history.is_empty());
}

#[tokio::test]
async fn s2_duplicate_message_id_is_rejected_second_time() {
    let store = Arc::new(FakeStore::default());
    let state = make_state(store.clone());
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "js@client.example"),
        ("subject", "Holiday policy question"),
        ("text", "Hi team"),
        ("headers", "Message-Id: <m1@client.example>"),
    ]);

    let (status1, text1) = post_webhook(state.clone(), body.clone()).await;
    assert_eq!(status1, StatusCode::OK);
    assert!(text1.starts_with("accepted:"));

    let (status2, text2) = post_webhook(state, body).await;
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(text2, "duplicate");

    assert_eq!(store.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn s3_loop_guard_rejects_own_outbound_address() {
    let store = Arc::new(FakeStore::default());
    let state = make_state(store.clone());
    let body = multipart_body(&[
        ("to", "js@client.example"),
        ("from", "advice@ops.example"),
        ("subject", "[P-20250603-0001] Argan Advice - Call Logged"),
        ("text", "Your call has been logged, see details below."),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ignored");
    assert!(store.records.lock().unwrap().is_empty());
}

fn base_ticket_record(history: Vec<ConversationEntry>) -> TicketRecord {
    TicketRecord {
        ticket_id: "ARG-20250603-0001".to_owned(),
        status: TicketStatus::New,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        subject: "Holiday policy question".to_owned(),
        body: "Hi team, how many days do I get?".to_owned(),
        from_addr: "js@client.example".to_owned(),
        sender_first: "John".to_owned(),
        sender_last: "Smith".to_owned(),
        org_name: String::new(),
        initial_entry: ConversationEntry {
            sender_email: "js@client.example".to_owned(),
            sender_name: "John Smith".to_owned(),
            sender_datetime: "03/06/2025 09:00 BST".to_owned(),
            content: "Hi team, how many days do I get?".to_owned(),
            order: 1,
        },
        history,
        raw_headers: String::new(),
        ack_sent: true,
        spf: String::new(),
        dkim: String::new(),
        has_attachments: false,
        attachment_count: 0,
    }
}

fn conversation_entry(email: &str, datetime: &str, content: &str, order: u32) -> ConversationEntry {
    ConversationEntry {
        sender_email: email.to_owned(),
        sender_name: "John Smith".to_owned(),
        sender_datetime: datetime.to_owned(),
        content: content.to_owned(),
        order,
    }
}

/// Quoted-original + new-reply decomposition a conversation-parse call would
/// return for a reply that quotes the message it's replying to.
fn quoting_reply_entries(original_content: &str, reply_datetime: &str, reply_content: &str) -> Value {
    json!([
        {"sender_email": "js@client.example", "sender_name": "John Smith", "sender_datetime": "03/06/2025 09:00 BST", "content": original_content},
        {"sender_email": "js@client.example", "sender_name": "John Smith", "sender_datetime": reply_datetime, "content": reply_content},
    ])
}

#[tokio::test]
async fn s4_existing_first_reply_merges_two_entries() {
    let store = Arc::new(FakeStore::default());
    store.records.lock().unwrap().insert("ARG-20250603-0001".to_owned(), base_ticket_record(Vec::new()));

    let llm = FakeLlmClient::for_parse(quoting_reply_entries(
        "Hi team, how many days do I get?",
        "03/06/2025 10:00 BST",
        "Thanks, one more question: does it roll over?",
    ));
    let state = make_state_with_llm(store.clone(), llm);
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "js@client.example"),
        ("subject", "Re: [ARG-20250603-0001] Holiday policy question"),
        ("text", "> Hi team, how many days do I get?\r\n\r\nThanks, one more question: does it roll over?"),
        ("headers", "Message-Id: <m2@client.example>"),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("updated:"));

    let records = store.records.lock().unwrap();
    let record = records.get("ARG-20250603-0001").unwrap();
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.history[0].content, "Hi team, how many days do I get?");
    assert_eq!(record.history[1].content, "Thanks, one more question: does it roll over?");
    assert_eq!(record.history.iter().map(|e| e.order).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn s5_existing_redundant_requote_does_not_duplicate_older_entries() {
    let store = Arc::new(FakeStore::default());
    let history = vec![
        conversation_entry("js@client.example", "03/06/2025 09:00 BST", "Hi team, how many days do I get?", 1),
        conversation_entry("js@client.example", "03/06/2025 10:00 BST", "Thanks, one more question: does it roll over?", 2),
    ];
    store.records.lock().unwrap().insert("ARG-20250603-0001".to_owned(), base_ticket_record(history));

    let requoted_and_new = json!([
        {"sender_email": "js@client.example", "sender_name": "John Smith", "sender_datetime": "03/06/2025 09:00 BST", "content": "Hi team, how many days do I get?"},
        {"sender_email": "js@client.example", "sender_name": "John Smith", "sender_datetime": "03/06/2025 10:00 BST", "content": "Thanks, one more question: does it roll over?"},
        {"sender_email": "js@client.example", "sender_name": "John Smith", "sender_datetime": "03/06/2025 11:00 BST", "content": "Actually, never mind, found it in the handbook."},
    ]);
    let state = make_state_with_llm(store.clone(), FakeLlmClient::for_parse(requoted_and_new));
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "js@client.example"),
        ("subject", "Re: [ARG-20250603-0001] Holiday policy question"),
        ("text", "> Hi team...\r\n> Thanks, one more question...\r\n\r\nActually, never mind, found it in the handbook."),
        ("headers", "Message-Id: <m3@client.example>"),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("updated:"));

    let records = store.records.lock().unwrap();
    let record = records.get("ARG-20250603-0001").unwrap();
    assert_eq!(record.history.len(), 3);
    assert_eq!(record.history.iter().map(|e| e.order).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(record.history[2].content, "Actually, never mind, found it in the handbook.");
}

#[tokio::test]
async fn s6_classifier_falls_back_to_regex_when_llm_errors() {
    let store = Arc::new(FakeStore::default());
    let state = make_state_with_llm(store.clone(), FakeLlmClient::failing_classifier());
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "js@client.example"),
        ("subject", "ARG-20250603-0007 follow-up"),
        ("text", "any update?"),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("no record for ticket ARG-20250603-0007"));
    assert!(store.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn existing_path_with_no_matching_record_returns_200_without_creating() {
    let store = Arc::new(FakeStore::default());
    let state = make_state(store.clone());
    let body = multipart_body(&[
        ("to", "advice@ops.example"),
        ("from", "js@client.example"),
        ("subject", "Re: [ARG-20250603-0099] Holiday policy question"),
        ("text", "does it roll over?"),
    ]);

    let (status, text) = post_webhook(state, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("no record for ticket"));
    assert!(store.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_route_returns_ok() {
    let store = Arc::new(FakeStore::default());
    let state = make_state(store);
    let router = app_http::build_router(state);
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
