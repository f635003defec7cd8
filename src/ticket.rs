//! Ticket Allocator. Produces a new ticket identifier, collision-free
//! against the store, per calendar day in the configured time zone.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::store::{StoreAdapter, StoreError};

const MAX_VALIDATION_RETRIES: u32 = 5;

pub fn format_ticket_id(prefix: &str, date: &str, seq: u32) -> String {
    format!("{prefix}-{date}-{seq:04}")
}

pub fn today_string(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%Y%m%d").to_string()
}

fn max_sequence(existing: &[String], prefix: &str, date: &str) -> u32 {
    let needle = format!("{prefix}-{date}-");
    existing
        .iter()
        .filter_map(|id| id.strip_prefix(&needle))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

pub async fn allocate(
    store: &dyn StoreAdapter,
    prefix: &str,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let date = today_string(now, tz);

    let mut attempt = 0;
    loop {
        let existing = store.list_by_date_prefix(&format!("{prefix}-{date}-")).await?;
        let candidate_seq = max_sequence(&existing, prefix, &date) + 1;
        let candidate = format_ticket_id(prefix, &date, candidate_seq);

        if !existing.contains(&candidate) {
            return Ok(candidate);
        }

        attempt += 1;
        if attempt >= MAX_VALIDATION_RETRIES {
            return Ok(fallback_ticket_id(prefix, &date, now, tz));
        }
    }
}

/// Last-resort identifier when every validation retry collides (spec
/// §4.6 step 6): `microseconds_since_midnight mod 10000`, logged by the
/// caller and treated as best-effort — the store's own uniqueness
/// constraint is the final backstop.
fn fallback_ticket_id(prefix: &str, date: &str, now: DateTime<Utc>, tz: Tz) -> String {
    let local = now.with_timezone(&tz);
    let micros_since_midnight = u64::from(local.num_seconds_from_midnight()) * 1_000_000 + u64::from(local.timestamp_subsec_micros());
    let seq = (micros_since_midnight % 10_000) as u32;
    format_ticket_id(prefix, date, seq)
}
