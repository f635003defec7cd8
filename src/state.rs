use std::sync::Arc;

use crate::config::AppConfig;
use crate::dedup::DedupGate;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::locks::TicketLockRegistry;
use crate::mail::MailClient;
use crate::store::StoreAdapter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn StoreAdapter>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub mail: MailClient,
    pub dedup: DedupGate,
    pub locks: TicketLockRegistry,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn StoreAdapter>) -> Self {
        let llm: Option<Arc<dyn LlmClient>> = config
            .llm_enabled
            .then(|| Arc::new(HttpLlmClient::new(config.llm_endpoint.clone(), config.llm_api_key.clone(), config.llm_model.clone())) as Arc<dyn LlmClient>);
        let mail = MailClient::new(config.mail_endpoint.clone(), config.mail_api_key.clone());
        let dedup = DedupGate::new(config.dedup_ttl());

        Self {
            config: Arc::new(config),
            store,
            llm,
            mail,
            dedup,
            locks: TicketLockRegistry::new(),
        }
    }
}
