use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::Store;
use crate::security::TokenService;
use crate::services::{AccountService, FaceEngine, FaceMatcher, IdentityGate, InventoryEngine, SessionTracker};
use crate::websocket::InventoryEvent;

const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub gate: IdentityGate,
    pub accounts: AccountService,
    pub inventory: InventoryEngine,
    pub sessions: SessionTracker,
    pub faces: FaceMatcher,
    pub events: broadcast::Sender<InventoryEvent>,
}

impl AppState {
    pub fn new(
        env: Config,
        store: Arc<dyn Store>,
        tokens: Arc<TokenService>,
        face_engine: Arc<dyn FaceEngine>,
    ) -> Self {
        let attempts = env.inventory.max_tx_attempts;
        let inventory = InventoryEngine::new(store.clone(), attempts);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            gate: IdentityGate::new(store.clone(), tokens.clone()),
            accounts: AccountService::new(store.clone(), tokens, attempts),
            sessions: SessionTracker::new(store.clone(), inventory.clone(), attempts),
            inventory,
            faces: FaceMatcher::new(face_engine),
            events,
            store,
            env: Arc::new(env),
        }
    }

    /// Push an event to dashboard subscribers. Having none is not an error.
    pub fn publish(&self, event: InventoryEvent) {
        let _ = self.events.send(event);
    }
}
