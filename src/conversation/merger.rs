//! Conversation Merger. Combines new entries from the Parser with the
//! stored history, deduplicating and producing a contiguously numbered,
//! strictly ordered result. The deterministic algorithm below is the
//! source of truth for tests; an optional LLM path may be
//! layered in front of it, but only takes effect if its output parses as a
//! valid entry list.

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::conversation::entry::ConversationEntry;

pub fn merge(existing: &[ConversationEntry], new_entries: &[ConversationEntry]) -> Vec<ConversationEntry> {
    let mut seen: HashSet<String> = existing.iter().map(ConversationEntry::fingerprint).collect();

    let mut combined: Vec<(usize, ConversationEntry)> = existing
        .iter()
        .cloned()
        .enumerate()
        .map(|(idx, e)| (idx, e))
        .collect();

    let base = combined.len();
    for (idx, entry) in new_entries.iter().enumerate() {
        let fp = entry.fingerprint();
        if seen.insert(fp) {
            combined.push((base + idx, entry.clone()));
        }
    }

    combined.sort_by(|(idx_a, a), (idx_b, b)| {
        let key_a = parse_datetime_key(&a.sender_datetime);
        let key_b = parse_datetime_key(&b.sender_datetime);
        // `None` must sort after every `Some`, the reverse of the derived
        // `Option` ordering, so unparseable dates land at the end.
        key_a
            .is_none()
            .cmp(&key_b.is_none())
            .then_with(|| key_a.cmp(&key_b))
            .then_with(|| idx_a.cmp(idx_b))
            .then_with(|| a.fingerprint().cmp(&b.fingerprint()))
    });

    combined
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut entry))| {
            entry.order = i as u32 + 1;
            entry
        })
        .collect()
}

/// Parses the `DD/MM/YYYY HH:MM` prefix for sort comparison. Unparseable
/// dates sort after all parseable ones and fall back to input order (the
/// secondary key).
fn parse_datetime_key(sender_datetime: &str) -> Option<NaiveDateTime> {
    let date_time_part = sender_datetime.splitn(3, ' ').take(2).collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&date_time_part, "%d/%m/%Y %H:%M").ok()
}
