use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use reqwest::Url;
use tracing::info;

use crate::db::SharedStore;
use crate::error::SyncError;
use crate::models::{Document, DocumentPatch, Permission, ShareLink};
use crate::services::access_service;
use crate::utils::SharedClock;

/// Random bytes behind every share token.
const TOKEN_BYTES: usize = 16;

/// A fresh opaque capability token (URL-safe, unpadded base64).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// `<origin>/doc?document=<doc_id>&token=<token>`
pub fn share_url(origin: &str, doc_id: &str, token: &str) -> String {
    let origin = origin.trim_end_matches('/');
    match Url::parse(&format!("{}/doc", origin)) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("document", doc_id)
                .append_pair("token", token);
            url.to_string()
        }
        Err(_) => format!("{}/doc?document={}&token={}", origin, doc_id, token),
    }
}

/// Extract `(document, token)` from a share URL.
pub fn parse_share_url(url: &str) -> Option<(String, Option<String>)> {
    let url = Url::parse(url).ok()?;
    let mut document = None;
    let mut token = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "document" => document = Some(value.into_owned()),
            "token" => token = Some(value.into_owned()),
            _ => {}
        }
    }
    document.filter(|d| !d.is_empty()).map(|d| (d, token))
}

/// Issues and revokes share links. Every operation is owner-only and
/// persists the whole `shareLinks` array.
///
/// Revocation only affects future opens; sessions already running keep the
/// access they were granted.
#[derive(Clone)]
pub struct ShareLinkManager {
    store: SharedStore,
    clock: SharedClock,
}

impl ShareLinkManager {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    async fn owned_document(&self, doc_id: &str, caller: Option<&str>) -> Result<Document, SyncError> {
        let doc = self
            .store
            .get(doc_id)
            .await?
            .ok_or_else(|| SyncError::DocumentNotFound(doc_id.to_string()))?;
        access_service::ensure_owner(&doc, caller)?;
        Ok(doc)
    }

    pub async fn list(&self, doc_id: &str, caller: Option<&str>) -> Result<Vec<ShareLink>, SyncError> {
        Ok(self.owned_document(doc_id, caller).await?.share_links)
    }

    /// Append a new link and return it with its index.
    pub async fn issue(
        &self,
        doc_id: &str,
        caller: Option<&str>,
        permission: Permission,
    ) -> Result<(usize, ShareLink), SyncError> {
        let doc = self.owned_document(doc_id, caller).await?;

        let link = ShareLink {
            token: generate_token(),
            permission,
            created_at: self.clock.now(),
        };
        let mut links = doc.share_links;
        let index = links.len();
        links.push(link.clone());
        self.store
            .update(doc_id, DocumentPatch::share_links(links))
            .await?;

        info!("Issued {} share link #{} for document {}", permission, index, doc_id);
        Ok((index, link))
    }

    pub async fn revoke(&self, doc_id: &str, caller: Option<&str>, index: usize) -> Result<ShareLink, SyncError> {
        let doc = self.owned_document(doc_id, caller).await?;

        let mut links = doc.share_links;
        if index >= links.len() {
            return Err(SyncError::InvalidShareLink(index));
        }
        let removed = links.remove(index);
        self.store
            .update(doc_id, DocumentPatch::share_links(links))
            .await?;

        info!("Revoked {} share link #{} of document {}", removed.permission, index, doc_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStore, MemoryDocumentStore};
    use crate::services::access_service::evaluate;
    use crate::utils::SystemClock;
    use chrono::Utc;
    use std::sync::Arc;

    async fn manager() -> (ShareLinkManager, SharedStore) {
        let mem = MemoryDocumentStore::new();
        let mut doc = Document::new("owner", "Notes", Utc::now());
        doc.id = "d1".to_string();
        mem.insert(doc).await.unwrap();
        let store: SharedStore = Arc::new(mem);
        (ShareLinkManager::new(store.clone(), Arc::new(SystemClock)), store)
    }

    #[test]
    fn tokens_are_url_safe_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn share_urls_round_trip() {
        let url = share_url("https://app.example.com/", "d1", "abc123");
        assert_eq!(url, "https://app.example.com/doc?document=d1&token=abc123");
        assert_eq!(
            parse_share_url(&url),
            Some(("d1".to_string(), Some("abc123".to_string())))
        );
        assert_eq!(
            parse_share_url("https://app.example.com/doc?document=d2"),
            Some(("d2".to_string(), None))
        );
        assert_eq!(parse_share_url("https://app.example.com/doc?token=x"), None);
    }

    #[tokio::test]
    async fn issued_links_grant_their_permission() {
        let (manager, store) = manager().await;
        let (first, view) = manager.issue("d1", Some("owner"), Permission::View).await.unwrap();
        let (second, edit) = manager.issue("d1", Some("owner"), Permission::Edit).await.unwrap();
        assert_eq!((first, second), (0, 1));

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc.share_links.len(), 2);
        assert_eq!(evaluate(&doc, None, Some(&view.token)).unwrap(), Permission::View);
        assert_eq!(evaluate(&doc, None, Some(&edit.token)).unwrap(), Permission::Edit);
    }

    #[tokio::test]
    async fn revoked_links_stop_granting_access_to_new_opens() {
        let (manager, store) = manager().await;
        let (_, view) = manager.issue("d1", Some("owner"), Permission::View).await.unwrap();
        let (_, edit) = manager.issue("d1", Some("owner"), Permission::Edit).await.unwrap();

        let removed = manager.revoke("d1", Some("owner"), 0).await.unwrap();
        assert_eq!(removed.token, view.token);

        let doc = store.get("d1").await.unwrap().unwrap();
        assert!(matches!(evaluate(&doc, None, Some(&view.token)), Err(SyncError::AccessDenied(_))));
        assert_eq!(evaluate(&doc, None, Some(&edit.token)).unwrap(), Permission::Edit);
    }

    #[tokio::test]
    async fn non_owners_cannot_manage_links() {
        let (manager, _) = manager().await;
        assert!(matches!(
            manager.issue("d1", Some("stranger"), Permission::Edit).await,
            Err(SyncError::AccessDenied(_))
        ));
        assert!(matches!(manager.list("d1", None).await, Err(SyncError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn revoking_out_of_range_is_rejected() {
        let (manager, _) = manager().await;
        assert!(matches!(
            manager.revoke("d1", Some("owner"), 3).await,
            Err(SyncError::InvalidShareLink(3))
        ));
        assert!(matches!(
            manager.revoke("missing", Some("owner"), 0).await,
            Err(SyncError::DocumentNotFound(_))
        ));
    }
}
