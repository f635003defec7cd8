//! Orchestrator. Drives the state machine:
//! wire → classify → NEW-or-EXISTING path → finalize. This is the only
//! component allowed to decide an HTTP-facing outcome.

use chrono::Utc;
use tracing::{info, warn};

use crate::ack::{self, AckTemplates};
use crate::classifier::{self};
use crate::context::{self, ContextRecord, Path};
use crate::conversation::{merger, parser};
use crate::dedup::DedupOutcome;
use crate::extractors;
use crate::loop_guard::{self, LoopVerdict};
use crate::state::AppState;
use crate::store::{retry_transient, StoreError, TicketPatch, TicketRecord, TicketStatus};
use crate::wire;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Accepted { ticket_id: String, path: Path },
    Duplicate,
    Ignored,
    NotFound { ticket_id: String },
    StoreFailure(String),
    InputError(String),
}

impl ProcessingOutcome {
    /// Collapses the outcome into the boundary error type the HTTP layer
    /// maps to a status code. `Ok` carries the response body text.
    pub fn into_pipeline_result(self) -> Result<String, crate::error::PipelineError> {
        use crate::error::PipelineError;
        match self {
            ProcessingOutcome::Accepted { ticket_id, path: Path::New } => Ok(format!("accepted: {ticket_id}")),
            ProcessingOutcome::Accepted { ticket_id, path: Path::Existing } => Ok(format!("updated: {ticket_id}")),
            ProcessingOutcome::Duplicate => Ok("duplicate".to_owned()),
            ProcessingOutcome::Ignored => Ok("ignored".to_owned()),
            ProcessingOutcome::NotFound { ticket_id } => Ok(format!("no record for ticket {ticket_id}")),
            ProcessingOutcome::StoreFailure(reason) => Err(PipelineError::Fatal(reason)),
            ProcessingOutcome::InputError(reason) => Err(PipelineError::Input(reason)),
        }
    }
}

const MAX_ALLOCATE_RETRIES: u32 = 3;

pub async fn handle_webhook(state: &AppState, body: &[u8], content_type: Option<&str>) -> ProcessingOutcome {
    let fields = match wire::decode(body, content_type, &state.config.default_boundary) {
        Ok(fields) => fields,
        Err(err) => return ProcessingOutcome::InputError(err.to_string()),
    };

    let mut ctx = match context::build(&fields, Utc::now()) {
        Ok(ctx) => ctx,
        Err(err) => return ProcessingOutcome::InputError(err.to_string()),
    };

    let correlation_id = if ctx.message_id == "unknown" {
        uuid::Uuid::new_v4().to_string()
    } else {
        ctx.message_id.clone()
    };
    let _span = tracing::info_span!("webhook", correlation_id = %correlation_id).entered();

    if state.dedup.claim(&ctx.message_id).await == DedupOutcome::Duplicate {
        info!("duplicate message_id, skipping");
        return ProcessingOutcome::Duplicate;
    }

    if loop_guard::check(&ctx, &state.config.outbound_from_addr, &state.config.loop_guard_marker_phrase) == LoopVerdict::Ignore {
        info!("loop guard rejected message");
        return ProcessingOutcome::Ignored;
    }

    let llm = state.llm.as_deref();
    let classification = classifier::classify(&ctx.subject, llm, &state.config.install_prefix, state.config.llm_deadline()).await;

    ctx.path = Some(classification.path);
    ctx.ticket_id = classification.ticket_id.clone();

    match classification.path {
        Path::New => handle_new(state, &mut ctx, &correlation_id).await,
        Path::Existing => handle_existing(state, &ctx, &correlation_id).await,
    }
}

async fn handle_new(state: &AppState, ctx: &mut ContextRecord, correlation_id: &str) -> ProcessingOutcome {
    let mut ticket_id = None;
    let mut last_err = None;

    for _ in 0..MAX_ALLOCATE_RETRIES {
        let candidate = match crate::ticket::allocate(state.store.as_ref(), &state.config.install_prefix, state.config.install_timezone, ctx.received_at).await {
            Ok(id) => id,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };

        let sender_name = extractors::extract_sender_name(&ctx.text_body, &ctx.from_addr, state.llm.as_deref(), state.config.llm_deadline()).await;
        let org_name = extractors::extract_org_name(&ctx.text_body, state.llm.as_deref(), state.config.llm_deadline()).await;

        let initial_entry = crate::conversation::ConversationEntry {
            sender_email: ctx.from_addr.clone(),
            sender_name: sender_name.full_name.clone().unwrap_or_default(),
            sender_datetime: parser::format_sender_datetime(ctx.received_at, state.config.install_timezone),
            content: ctx.text_body.clone(),
            order: 1,
        };

        let now = Utc::now();
        let record = TicketRecord {
            ticket_id: candidate.clone(),
            status: TicketStatus::New,
            created_at: now,
            updated_at: now,
            subject: ctx.subject.clone(),
            body: ctx.text_body.clone(),
            from_addr: ctx.from_addr.clone(),
            sender_first: sender_name.first.clone(),
            sender_last: sender_name.last.clone(),
            org_name,
            initial_entry,
            history: Vec::new(),
            raw_headers: ctx.headers_blob.clone(),
            ack_sent: false,
            spf: ctx.spf.clone(),
            dkim: ctx.dkim.clone(),
            has_attachments: ctx.has_attachments,
            attachment_count: ctx.attachment_count as i32,
        };

        match retry_transient(|| state.store.create(&record)).await {
            Ok(()) => {
                ticket_id = Some((candidate, sender_name));
                break;
            }
            Err(StoreError::Conflict(_)) => continue,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        }
    }

    let Some((ticket_id, sender_name)) = ticket_id else {
        warn!(correlation_id = %correlation_id, "store write failed on NEW path: {:?}", last_err);
        return ProcessingOutcome::StoreFailure(last_err.map(|e| e.to_string()).unwrap_or_else(|| "allocation exhausted".to_owned()));
    };

    let message = ack::compose(
        ctx,
        &ticket_id,
        &state.config.install_short_name,
        &sender_name,
        "Normal",
        &state.config.outbound_from_addr,
        &state.config.outbound_cc_addr,
        &AckTemplates { text: &state.config.ack_template_text, html: &state.config.ack_template_html },
    );

    let sent = ack::send_with_retry(&state.mail, &message, state.config.mail_deadline()).await;
    if sent {
        let _ = retry_transient(|| state.store.update_flag(&ticket_id, "ack_sent", true)).await;
    } else {
        warn!(correlation_id = %correlation_id, ticket_id = %ticket_id, "acknowledgment send failed, ticket remains without ack");
    }

    ProcessingOutcome::Accepted { ticket_id, path: Path::New }
}

async fn handle_existing(state: &AppState, ctx: &ContextRecord, correlation_id: &str) -> ProcessingOutcome {
    let Some(ticket_id) = ctx.ticket_id.clone() else {
        return ProcessingOutcome::NotFound { ticket_id: String::new() };
    };

    let _guard = state.locks.acquire(&ticket_id).await;

    let record = match retry_transient(|| state.store.find_by_ticket(&ticket_id)).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            info!(correlation_id = %correlation_id, ticket_id = %ticket_id, "existing path: no matching record");
            return ProcessingOutcome::NotFound { ticket_id };
        }
        Err(err) => {
            warn!(correlation_id = %correlation_id, "store read failed on EXISTING path: {}", err);
            return ProcessingOutcome::NotFound { ticket_id };
        }
    };

    let new_entries = parser::parse(&ctx.text_body, &ctx.from_addr, ctx.received_at, state.config.install_timezone, state.llm.as_deref(), state.config.llm_deadline()).await;
    let merged = merger::merge(&record.history, &new_entries);

    let patch = TicketPatch {
        history: Some(merged),
        raw_headers: Some(ctx.headers_blob.clone()),
        status: None,
    };

    if let Err(err) = retry_transient(|| state.store.update(&ticket_id, &patch)).await {
        warn!(correlation_id = %correlation_id, "store update failed on EXISTING path: {}", err);
    }

    ProcessingOutcome::Accepted { ticket_id, path: Path::Existing }
}
