use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::store::{DocumentStore, Subscription};
use crate::error::StoreError;
use crate::models::{Document, DocumentPatch};

/// One merge-write accepted by the memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub doc_id: String,
    pub patch: DocumentPatch,
}

#[derive(Default)]
struct MemoryInner {
    docs: HashMap<String, Document>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Document>>>,
    writes: Vec<WriteRecord>,
    fail_writes: Option<String>,
    write_latency: Option<Duration>,
}

/// Process-local document store.
///
/// Used when no database is configured and by the test suites, which rely on
/// its write log and fault injection.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted write for `doc_id`, oldest first.
    pub async fn writes(&self, doc_id: &str) -> Vec<DocumentPatch> {
        let inner = self.inner.lock().await;
        inner
            .writes
            .iter()
            .filter(|w| w.doc_id == doc_id)
            .map(|w| w.patch.clone())
            .collect()
    }

    /// Number of accepted writes that touched `content`, `name` or `lastModified`.
    pub async fn content_writes(&self, doc_id: &str) -> usize {
        self.writes(doc_id)
            .await
            .iter()
            .filter(|p| p.writes_content())
            .count()
    }

    /// Make every following write fail with `reason`, or heal the store with `None`.
    pub async fn fail_writes(&self, reason: Option<&str>) {
        self.inner.lock().await.fail_writes = reason.map(str::to_string);
    }

    /// Delay every following write by `latency` before it commits.
    pub async fn set_write_latency(&self, latency: Option<Duration>) {
        self.inner.lock().await.write_latency = latency;
    }

    /// Number of live subscriptions on `doc_id`.
    pub async fn subscriber_count(&self, doc_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        match inner.subscribers.get_mut(doc_id) {
            Some(subs) => {
                subs.retain(|tx| !tx.is_closed());
                subs.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.docs.get(id).cloned())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        inner.subscribers.entry(id.to_string()).or_default().push(tx);
        debug!("Subscribed to document {}", id);
        Ok(Subscription::new(id, rx))
    }

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), StoreError> {
        let latency = self.inner.lock().await.write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.fail_writes {
            return Err(StoreError::Unavailable(reason.clone()));
        }

        let snapshot = {
            let doc = inner
                .docs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            doc.apply(patch.clone());
            doc.clone()
        };

        inner.writes.push(WriteRecord {
            doc_id: id.to_string(),
            patch,
        });

        // Closed receivers are unsubscribed sessions.
        if let Some(subs) = inner.subscribers.get_mut(id) {
            subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
        Ok(())
    }

    async fn insert(&self, document: Document) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        info!("Inserting document {} owned by {}", document.id, document.owner_id);
        inner.docs.insert(document.id.clone(), document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn doc(id: &str) -> Document {
        let mut doc = Document::new("owner", "Notes", DateTime::from_timestamp_millis(0).unwrap());
        doc.id = id.to_string();
        doc
    }

    #[tokio::test]
    async fn update_merges_and_notifies_subscribers_in_order() {
        let store = MemoryDocumentStore::new();
        store.insert(doc("d1")).await.unwrap();
        let mut sub = store.subscribe("d1").await.unwrap();

        store
            .update("d1", DocumentPatch { content: Some("one".into()), ..Default::default() })
            .await
            .unwrap();
        store
            .update("d1", DocumentPatch { content: Some("two".into()), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().content, "one");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.content, "two");
        assert_eq!(second.name, "Notes");
        assert_eq!(store.content_writes("d1").await, 2);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let store = MemoryDocumentStore::new();
        store.insert(doc("d1")).await.unwrap();
        let sub = store.subscribe("d1").await.unwrap();
        assert_eq!(store.subscriber_count("d1").await, 1);

        drop(sub);
        assert_eq!(store.subscriber_count("d1").await, 0);
    }

    #[tokio::test]
    async fn updates_to_missing_documents_fail() {
        let store = MemoryDocumentStore::new();
        let err = store.update("nope", DocumentPatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn injected_failures_reject_writes_without_applying_them() {
        let store = MemoryDocumentStore::new();
        store.insert(doc("d1")).await.unwrap();
        store.fail_writes(Some("offline")).await;

        let err = store
            .update("d1", DocumentPatch { content: Some("lost".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.get("d1").await.unwrap().unwrap().content, "");
        assert!(store.writes("d1").await.is_empty());
    }
}
