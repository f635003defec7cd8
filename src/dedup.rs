//! Dedup Gate. At-most-once processing per `message_id`, backed by an
//! in-process concurrent map with per-entry TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Accepted,
    Duplicate,
}

#[derive(Clone)]
pub struct DedupGate {
    claimed: Arc<RwLock<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claimed: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// The sentinel `"unknown"` is always accepted: unknown
    /// identity is safer treated as new, downstream logic relies on the
    /// Loop Guard and Classifier instead.
    pub async fn claim(&self, message_id: &str) -> DedupOutcome {
        if message_id == "unknown" {
            return DedupOutcome::Accepted;
        }

        let now = Instant::now();
        {
            let map = self.claimed.read().await;
            if let Some(claimed_at) = map.get(message_id) {
                if now.duration_since(*claimed_at) < self.ttl {
                    return DedupOutcome::Duplicate;
                }
            }
        }

        let mut map = self.claimed.write().await;
        if let Some(claimed_at) = map.get(message_id) {
            if now.duration_since(*claimed_at) < self.ttl {
                return DedupOutcome::Duplicate;
            }
        }
        map.insert(message_id.to_owned(), now);
        DedupOutcome::Accepted
    }

    /// Drops entries past their TTL. Called periodically from a background
    /// task; not required for correctness (a stale entry only makes a claim
    /// stricter than necessary until swept).
    pub async fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.claimed.write().await.retain(|_, claimed_at| now.duration_since(*claimed_at) < ttl);
    }
}
