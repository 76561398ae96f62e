use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

use crate::error::SyncError;
use crate::ws::docsession::DocumentSession;

/// Something that can be shut down asynchronously.
pub trait Closable: Send {
    fn close(self) -> impl Future<Output = ()> + Send;
}

impl Closable for DocumentSession {
    fn close(self) -> impl Future<Output = ()> + Send {
        DocumentSession::close(self)
    }
}

/// Owns the open sessions of one host, keyed by view name.
///
/// Opening a name that is already taken closes the previous session first, so
/// switching views never leaks a subscription or a presence entry.
pub struct SessionManager<H: Closable = DocumentSession> {
    sessions: HashMap<String, H>,
}

impl<H: Closable> Default for SessionManager<H> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<H: Closable> SessionManager<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close whatever is open under `name`, then open a new session with `factory`.
    pub async fn open<F, Fut>(&mut self, name: &str, factory: F) -> Result<&H, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, SyncError>>,
    {
        if let Some(previous) = self.sessions.remove(name) {
            debug!("Replacing session '{}'", name);
            previous.close().await;
        }
        let handle = factory().await?;
        Ok(self.sessions.entry(name.to_string()).or_insert(handle))
    }

    pub fn get(&self, name: &str) -> Option<&H> {
        self.sessions.get(name)
    }

    /// Close the session under `name`. Returns whether one was open.
    pub async fn close(&mut self, name: &str) -> bool {
        match self.sessions.remove(name) {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&mut self) {
        for (name, handle) in self.sessions.drain() {
            debug!("Closing session '{}'", name);
            handle.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
