use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::StoreError;
use crate::models::{Document, DocumentPatch};

/// The external document store every session reads from and writes to.
///
/// `update` is a merge-write of the top-level fields present in the patch,
/// never a full-document replace. Change notifications are delivered to each
/// subscriber in commit order, including to the writer itself.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError>;

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), StoreError>;

    async fn insert(&self, document: Document) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Live change feed for one document. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    doc_id: String,
    rx: mpsc::UnboundedReceiver<Document>,
    listener: Option<AbortHandle>,
}

impl Subscription {
    pub fn new(doc_id: &str, rx: mpsc::UnboundedReceiver<Document>) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            rx,
            listener: None,
        }
    }

    /// Attach the background task feeding this subscription; it is aborted on drop.
    pub fn with_listener(mut self, listener: AbortHandle) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Next committed state of the document, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<Document> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
