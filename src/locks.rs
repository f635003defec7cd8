//! Per-ticket advisory lock registry. Serializes the EXISTING path's
//! `fetch → parse → merge → update` sequence for a single ticket while
//! leaving distinct tickets free to run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Clone, Default)]
pub struct TicketLockRegistry {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TicketLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, ticket_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let registry = self.locks.read().await;
            registry.get(ticket_id).cloned()
        };
        let lock = match lock {
            Some(lock) => lock,
            None => {
                let mut registry = self.locks.write().await;
                registry
                    .entry(ticket_id.to_owned())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            }
        };
        lock.lock_owned().await
    }
}
