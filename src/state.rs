use std::sync::Arc;

use crate::clients::UploadClient;
use crate::db::SharedStore;
use crate::services::{IdentityResolver, ShareLinkManager};
use crate::utils::SharedClock;
use crate::ws::{SessionContext, SyncSettings};

/// Shared state of the HTTP and websocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionContext,
    pub shares: ShareLinkManager,
    pub identities: IdentityResolver,
    pub uploads: Option<UploadClient>,
    pub app_origin: String,
}

impl AppState {
    pub fn new(store: SharedStore, clock: SharedClock, settings: SyncSettings, identities: IdentityResolver) -> Self {
        Self {
            shares: ShareLinkManager::new(store.clone(), clock.clone()),
            sessions: SessionContext::new(store, clock, settings),
            identities,
            uploads: None,
            app_origin: "http://localhost:3000".to_string(),
        }
    }

    pub fn with_app_origin(mut self, origin: &str) -> Self {
        self.app_origin = origin.trim_end_matches('/').to_string();
        self
    }

    pub fn with_uploads(mut self, uploads: UploadClient) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.sessions.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.sessions.clock
    }
}

pub type SharedState = Arc<AppState>;
