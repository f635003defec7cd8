//! Loop Guard. Prevents the system from reprocessing its own outbound
//! acknowledgments after a recipient's mailbox auto-forwards them back.

use crate::context::ContextRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVerdict {
    Proceed,
    Ignore,
}

pub fn check(ctx: &ContextRecord, outbound_from_addr: &str, marker_phrase: &str) -> LoopVerdict {
    if ctx.from_addr == outbound_from_addr {
        return LoopVerdict::Ignore;
    }

    if subject_matches_ack_template(&ctx.subject) && ctx.text_body.to_lowercase().contains(&marker_phrase.to_lowercase()) {
        return LoopVerdict::Ignore;
    }

    if let Some(envelope_from) = &ctx.envelope_from {
        if envelope_from == outbound_from_addr {
            return LoopVerdict::Ignore;
        }
    }

    LoopVerdict::Proceed
}

/// Recognizes the `[<ticket_id>] <install.short_name> - Call Logged`
/// acknowledgment subject shape without depending on a
/// specific install name.
fn subject_matches_ack_template(subject: &str) -> bool {
    subject.trim_start().starts_with('[') && subject.contains("] ") && subject.contains(" - Call Logged")
}
