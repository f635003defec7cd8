//! Thin wrapper over the outbound mail provider's HTTPS endpoint.
//! Used exclusively by the Acknowledgment Sender.

use std::time::Duration;

use serde::Serialize;

use crate::error::MailError;

#[derive(Clone)]
pub struct MailClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
pub struct Personalization {
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct OutboundMessage {
    pub personalizations: Vec<Personalization>,
    pub from: String,
    pub reply_to: String,
    pub subject: String,
    pub content: Vec<Content>,
}

impl MailClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    pub async fn send(&self, message: &OutboundMessage, deadline: Duration) -> Result<(), MailError> {
        let fut = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(message)
            .send();

        let response = tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| MailError::Timeout)?
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MailError::Http(response.status().as_u16()))
        }
    }
}
