//! The single LLM call abstraction. Every
//! LLM-driven decision in the system — classification, conversation
//! parsing, both extractors, and the merger's optional advanced path —
//! goes through `call_llm`. Nothing outside this module knows the
//! provider's wire format.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::LlmError;

/// The single LLM call seam, same shape as `StoreAdapter`: one trait so a
/// fake implementation can stand in for tests, one real implementation
/// (`HttpLlmClient`) backing it in production.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Issue a schema-constrained chat completion. Returns the provider's
    /// structured response body, already validated against `schema` by the
    /// provider, within `deadline`.
    async fn call(&self, system_prompt: &str, user_prompt: &str, schema: Value, deadline: Duration) -> Result<Value, LlmError>;
}

#[derive(Clone)]
pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn call(&self, system_prompt: &str, user_prompt: &str, schema: Value, deadline: Duration) -> Result<Value, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            system_prompt,
            user_prompt,
            response_schema: schema,
        };

        let fut = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        let response = tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(response.status().as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::SchemaMismatch(e.to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    user_prompt: &'a str,
    response_schema: Value,
}
