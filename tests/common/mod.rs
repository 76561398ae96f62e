#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;

use docsync::db::{DocumentStore, MemoryDocumentStore, SharedStore};
use docsync::models::{Document, Identity, Permission, Presence, ShareLink};
use docsync::utils::{SharedClock, TokioClock};
use docsync::ws::{SessionContext, SyncSettings};

pub const OWNER: &str = "owner";
pub const VIEW_TOKEN: &str = "view-token";
pub const EDIT_TOKEN: &str = "edit-token";

pub fn ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

pub fn owner() -> Identity {
    Identity::new(OWNER).with_display_name("owner@example.com")
}

pub fn document(id: &str, content: &str) -> Document {
    let mut doc = Document::new(OWNER, "Notes", ts(0)).with_content(content);
    doc.id = id.to_string();
    doc.share_links = vec![
        ShareLink {
            token: VIEW_TOKEN.to_string(),
            permission: Permission::View,
            created_at: ts(0),
        },
        ShareLink {
            token: EDIT_TOKEN.to_string(),
            permission: Permission::Edit,
            created_at: ts(0),
        },
    ];
    doc
}

pub fn ghost(id: &str, last_seen: i64) -> Presence {
    Presence {
        id: id.to_string(),
        name: "Ghost".to_string(),
        color: "#ef4444".to_string(),
        last_seen: ts(last_seen),
    }
}

pub struct Harness {
    pub mem: MemoryDocumentStore,
    pub store: SharedStore,
    pub clock: SharedClock,
    pub ctx: SessionContext,
}

impl Harness {
    /// Store with documents `d1` and `d2`, clock at the epoch, default timings.
    /// Must be called inside a runtime with paused time.
    pub async fn new() -> Self {
        Self::with_documents(vec![document("d1", "<p>v0</p>"), document("d2", "<p>other</p>")]).await
    }

    pub async fn with_documents(docs: Vec<Document>) -> Self {
        let mem = MemoryDocumentStore::new();
        for doc in docs {
            mem.insert(doc).await.unwrap();
        }
        let store: SharedStore = Arc::new(mem.clone());
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));
        let ctx = SessionContext::new(store.clone(), clock.clone(), SyncSettings::default());
        Self { mem, store, clock, ctx }
    }

    pub async fn stored(&self, doc_id: &str) -> Document {
        self.store.get(doc_id).await.unwrap().unwrap()
    }
}

/// Let every runnable task make progress without moving paused time.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
