//! Acknowledgment Sender. Composes and dispatches the NEW-path
//! acknowledgment, with retry.

use std::time::Duration;

use crate::context::ContextRecord;
use crate::extractors::SenderName;
use crate::mail::{Content, MailClient, OutboundMessage, Personalization};

const INITIAL_DELAY: Duration = Duration::from_millis(500);
const RETRY_DELAYS: [Duration; 3] = [Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)];

pub struct AckTemplates<'a> {
    pub text: &'a str,
    pub html: &'a str,
}

pub fn compose(
    ctx: &ContextRecord,
    ticket_id: &str,
    install_short_name: &str,
    sender_name: &SenderName,
    priority: &str,
    outbound_from_addr: &str,
    outbound_cc_addr: &str,
    templates: &AckTemplates<'_>,
) -> OutboundMessage {
    let subject = format!("[{ticket_id}] {install_short_name} - Call Logged");

    let greeting = if sender_name.confidence >= 0.5 && !sender_name.first.is_empty() {
        format!("Hi {}", sender_name.first)
    } else {
        "Hello".to_owned()
    };

    let text_body = substitute(templates.text, ticket_id, ctx, priority, &greeting);
    let html_body = substitute(templates.html, ticket_id, ctx, priority, &greeting);

    OutboundMessage {
        personalizations: vec![Personalization {
            to: vec![ctx.from_addr.clone()],
            cc: vec![outbound_cc_addr.to_owned()],
        }],
        from: outbound_from_addr.to_owned(),
        reply_to: ctx.from_addr.clone(),
        subject,
        content: vec![
            Content { content_type: "text/plain", value: text_body },
            Content { content_type: "text/html", value: html_body },
        ],
    }
}

fn substitute(template: &str, ticket_id: &str, ctx: &ContextRecord, priority: &str, greeting: &str) -> String {
    template
        .replace("{greeting}", greeting)
        .replace("{ticket_id}", ticket_id)
        .replace("{original_subject}", &ctx.subject)
        .replace("{original_body}", &ctx.text_body)
        .replace("{priority}", priority)
}

/// Sends with up to 3 retries (2s/4s/6s backoff), preceded by a 500ms
/// delay to avoid a connection race with the webhook's own response.
/// Success is a 2xx from the mail provider.
pub async fn send_with_retry(mail: &MailClient, message: &OutboundMessage, deadline: Duration) -> bool {
    tokio::time::sleep(INITIAL_DELAY).await;

    if mail.send(message, deadline).await.is_ok() {
        return true;
    }

    for delay in RETRY_DELAYS {
        tokio::time::sleep(delay).await;
        if mail.send(message, deadline).await.is_ok() {
            return true;
        }
    }

    false
}
