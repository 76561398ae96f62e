use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    response::Response,
};
use base64::{engine::general_purpose, Engine as _};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::clients::{UploadFile, UploadedFile};
use crate::error::SyncError;
use crate::models::messages::{
    AttachMessage, AttachedMessage, ErrorMessage, OpenMessage, OpenedMessage, ReceivedMessage, SendMessage,
};
use crate::models::SessionView;
use crate::state::SharedState;
use crate::ws::{DocumentSession, SessionManager};

/// Name under which a connection keeps its one live session.
const CURRENT: &str = "document";

/// Reply to a request that waits on the store or the upload service.
type PendingReply = BoxFuture<'static, SendMessage>;

/// WebSocket handler
pub async fn websocket_handler(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New WebSocket connection attempt (identity {:?})", caller.id());
    ws.on_upgrade(move |socket| handle_socket(socket, state, caller))
}

fn error_message(e: &SyncError) -> SendMessage {
    SendMessage::Error(ErrorMessage {
        code: e.status_code().as_u16(),
        error: e.to_string(),
    })
}

async fn wait_view(view: &mut Option<watch::Receiver<SessionView>>) -> Option<SessionView> {
    match view.as_mut() {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: SharedState, caller: CallerIdentity) {
    let connection_id = Uuid::new_v4().to_string();
    info!("WebSocket connection {} established", connection_id);

    let (mut sender, mut receiver) = socket.split();

    // One writer task owns the sink
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SendMessage>();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outgoing message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut host = SessionHost {
        state,
        caller,
        sessions: SessionManager::new(),
        view: None,
        out: out_tx,
        pending: FuturesUnordered::new(),
    };

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let msg: ReceivedMessage = match serde_json::from_str(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!("Failed to parse message on connection {}: {}", connection_id, e);
                            host.send(SendMessage::Error(ErrorMessage { code: 400, error: e.to_string() }));
                            continue;
                        }
                    };
                    debug!("Received message on connection {}: {:?}", connection_id, msg);
                    host.handle(msg).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket connection {} failed: {}", connection_id, e);
                    break;
                }
            },
            view = wait_view(&mut host.view) => match view {
                Some(view) => host.send(SendMessage::View(view)),
                None => host.view = None,
            },
            Some(reply) = host.pending.next(), if !host.pending.is_empty() => host.send(reply),
            _ = &mut send_task => break,
        }
    }

    host.sessions.close_all().await;
    drop(host);
    send_task.abort();
    info!("WebSocket connection {} terminated", connection_id);
}

struct SessionHost {
    state: SharedState,
    caller: CallerIdentity,
    sessions: SessionManager<DocumentSession>,
    view: Option<watch::Receiver<SessionView>>,
    out: mpsc::UnboundedSender<SendMessage>,
    // Saves and uploads in flight; the read loop never waits on them.
    pending: FuturesUnordered<PendingReply>,
}

impl SessionHost {
    fn send(&self, msg: SendMessage) {
        let _ = self.out.send(msg);
    }

    fn current(&self) -> Result<&DocumentSession, SyncError> {
        self.sessions.get(CURRENT).ok_or(SyncError::SessionClosed)
    }

    fn report(&self, result: Result<(), SyncError>) {
        if let Err(e) = result {
            self.send(error_message(&e));
        }
    }

    async fn handle(&mut self, msg: ReceivedMessage) {
        match msg {
            ReceivedMessage::Open(open) => self.open(open).await,
            ReceivedMessage::Edit(edit) => {
                let result = self.current().and_then(|s| s.edit(edit.content));
                self.report(result);
            }
            ReceivedMessage::Rename(rename) => {
                let result = self.current().and_then(|s| s.rename(rename.name));
                self.report(result);
            }
            ReceivedMessage::Focus(focus) => {
                let result = self.current().and_then(|s| s.set_focused(focus.focused));
                self.report(result);
            }
            ReceivedMessage::Attach(attach) => match self.attach(attach) {
                Ok(upload) => self.reply_later(async move {
                    match upload.await {
                        Ok(file) => SendMessage::Attached(AttachedMessage { url: file.url }),
                        Err(e) => error_message(&e),
                    }
                }),
                Err(e) => self.send(error_message(&e)),
            },
            ReceivedMessage::Save => match self.current() {
                Ok(session) => {
                    let saving = session.save_now();
                    self.reply_later(async move {
                        match saving.await {
                            Ok(()) => SendMessage::Saved,
                            Err(e) => error_message(&e),
                        }
                    });
                }
                Err(e) => self.send(error_message(&e)),
            },
            ReceivedMessage::Close => {
                self.view = None;
                self.sessions.close(CURRENT).await;
                self.send(SendMessage::Closed);
            }
        }
    }

    async fn open(&mut self, open: OpenMessage) {
        self.view = None;
        let ctx = self.state.sessions.clone();
        let identity = self.caller.identity().cloned();
        let result = self
            .sessions
            .open(CURRENT, || async move {
                DocumentSession::open(&ctx, &open.doc_id, identity.as_ref(), open.token.as_deref()).await
            })
            .await;

        let opened = result.map(|session| {
            let mut view = session.watch();
            let current = view.borrow_and_update().clone();
            let opened = OpenedMessage {
                doc_id: session.doc_id().to_string(),
                permission: session.permission(),
                presence_id: session.presence_id().map(str::to_string),
            };
            (opened, current, view)
        });

        match opened {
            Ok((opened, current, view)) => {
                self.send(SendMessage::Opened(opened));
                self.send(SendMessage::View(current));
                self.view = Some(view);
            }
            Err(e) => {
                warn!("Failed to open document: {}", e);
                self.send(error_message(&e));
            }
        }
    }

    fn reply_later(&self, reply: impl Future<Output = SendMessage> + Send + 'static) {
        self.pending.push(Box::pin(reply));
    }

    fn attach(
        &self,
        attach: AttachMessage,
    ) -> Result<impl Future<Output = Result<UploadedFile, SyncError>> + Send + 'static, SyncError> {
        let session = self.current()?;
        if session.is_read_only() {
            return Err(SyncError::ReadOnly);
        }
        let bytes = general_purpose::STANDARD
            .decode(attach.data.as_bytes())
            .map_err(|e| SyncError::InvalidAttachment(format!("invalid base64 data: {}", e)))?;
        let uploads = self
            .state
            .uploads
            .as_ref()
            .ok_or_else(|| SyncError::UploadFailure("no upload service configured".to_string()))?;

        let file = UploadFile {
            file_name: attach.file_name,
            mime_type: attach.mime_type,
            bytes,
        };
        Ok(session.upload_attachment(uploads, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time;

    use crate::db::{DocumentStore, MemoryDocumentStore, SharedStore};
    use crate::models::messages::EditMessage;
    use crate::models::{Document, Identity, Permission, ShareLink};
    use crate::services::IdentityResolver;
    use crate::state::AppState;
    use crate::utils::{SharedClock, TokioClock};
    use crate::ws::SyncSettings;

    const VIEW_TOKEN: &str = "view-token";

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    async fn app_state() -> (SharedState, MemoryDocumentStore) {
        let mem = MemoryDocumentStore::new();
        for id in ["d1", "d2"] {
            let mut doc = Document::new("owner", "Notes", ts(0)).with_content("<p>v0</p>");
            doc.id = id.to_string();
            doc.share_links = vec![ShareLink {
                token: VIEW_TOKEN.to_string(),
                permission: Permission::View,
                created_at: ts(0),
            }];
            mem.insert(doc).await.unwrap();
        }
        let store: SharedStore = Arc::new(mem.clone());
        let clock: SharedClock = Arc::new(TokioClock::new(ts(0)));
        let state = AppState::new(store, clock, SyncSettings::default(), IdentityResolver::new(None));
        (Arc::new(state), mem)
    }

    fn session_host(state: SharedState, identity: Option<Identity>) -> (SessionHost, mpsc::UnboundedReceiver<SendMessage>) {
        let (out, rx) = mpsc::unbounded_channel();
        let host = SessionHost {
            state,
            caller: CallerIdentity(identity),
            sessions: SessionManager::new(),
            view: None,
            out,
            pending: FuturesUnordered::new(),
        };
        (host, rx)
    }

    fn open(doc_id: &str, token: Option<&str>) -> ReceivedMessage {
        ReceivedMessage::Open(OpenMessage {
            doc_id: doc_id.to_string(),
            token: token.map(str::to_string),
        })
    }

    fn edit(content: &str) -> ReceivedMessage {
        ReceivedMessage::Edit(EditMessage {
            content: content.to_string(),
        })
    }

    fn attach(data: &str) -> AttachMessage {
        AttachMessage {
            file_name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            data: data.to_string(),
        }
    }

    fn sent(rx: &mut mpsc::UnboundedReceiver<SendMessage>) -> Vec<SendMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn error_code(msg: &SendMessage) -> Option<u16> {
        match msg {
            SendMessage::Error(e) => Some(e.code),
            _ => None,
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn open_replies_with_opened_then_view() {
        let (state, _mem) = app_state().await;
        let (mut host, mut rx) = session_host(state, Some(Identity::new("owner")));

        host.handle(open("d1", None)).await;
        let messages = sent(&mut rx);

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            SendMessage::Opened(OpenedMessage {
                doc_id: "d1".to_string(),
                permission: Permission::Edit,
                presence_id: Some("owner_0".to_string()),
            })
        );
        match &messages[1] {
            SendMessage::View(view) => {
                assert_eq!(view.content, "<p>v0</p>");
                assert!(!view.read_only);
            }
            other => panic!("expected a view, got {:?}", other),
        }
        host.sessions.close_all().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_saves_do_not_stall_the_connection() {
        let (state, mem) = app_state().await;
        let (mut host, mut rx) = session_host(state, Some(Identity::new("owner")));
        host.handle(open("d1", None)).await;
        sent(&mut rx);

        mem.set_write_latency(Some(Duration::from_secs(3600))).await;
        host.handle(edit("<p>first</p>")).await;
        assert!(time::timeout(Duration::from_secs(1), host.handle(ReceivedMessage::Save))
            .await
            .is_ok());
        host.handle(edit("<p>second</p>")).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        assert_eq!(host.pending.len(), 1);
        assert_eq!(host.current().unwrap().view().content, "<p>second</p>");
        assert!(sent(&mut rx).iter().all(|msg| *msg != SendMessage::Saved));

        mem.set_write_latency(None).await;
        assert_eq!(host.pending.next().await, Some(SendMessage::Saved));
        assert!(mem.content_writes("d1").await >= 1);
        host.sessions.close_all().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn viewers_get_forbidden_errors_for_mutations() {
        let (state, mem) = app_state().await;
        let (mut host, mut rx) = session_host(state, None);
        host.handle(open("d1", Some(VIEW_TOKEN))).await;
        assert!(matches!(
            &sent(&mut rx)[0],
            SendMessage::Opened(OpenedMessage { permission: Permission::View, presence_id: None, .. })
        ));

        host.handle(edit("<p>nope</p>")).await;
        let messages = sent(&mut rx);
        assert_eq!(messages.iter().map(error_code).collect::<Vec<_>>(), vec![Some(403)]);

        host.handle(ReceivedMessage::Save).await;
        let reply = host.pending.next().await.unwrap();
        assert_eq!(error_code(&reply), Some(403));

        host.handle(ReceivedMessage::Attach(attach("iVBORw=="))).await;
        assert_eq!(error_code(&sent(&mut rx)[0]), Some(403));

        assert_eq!(mem.content_writes("d1").await, 0);
        host.sessions.close_all().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn opening_another_document_closes_the_current_one() {
        let (state, mem) = app_state().await;
        let (mut host, mut rx) = session_host(state, Some(Identity::new("owner")));

        host.handle(open("d1", None)).await;
        assert_eq!(mem.subscriber_count("d1").await, 1);

        host.handle(open("d2", None)).await;
        assert_eq!(mem.subscriber_count("d1").await, 0);
        assert_eq!(mem.subscriber_count("d2").await, 1);
        assert_eq!(host.sessions.len(), 1);
        assert_eq!(host.current().unwrap().doc_id(), "d2");
        assert!(mem.get("d1").await.unwrap().unwrap().active_users.is_empty());

        host.handle(ReceivedMessage::Close).await;
        assert_eq!(mem.subscriber_count("d2").await, 0);
        assert!(host.sessions.is_empty());
        assert_eq!(sent(&mut rx).last(), Some(&SendMessage::Closed));

        host.handle(edit("<p>late</p>")).await;
        assert_eq!(error_code(&sent(&mut rx)[0]), Some(409));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn attachments_must_be_valid_base64() {
        let (state, _mem) = app_state().await;
        let (mut host, mut rx) = session_host(state, Some(Identity::new("owner")));
        host.handle(open("d1", None)).await;
        sent(&mut rx);

        assert!(matches!(
            host.attach(attach("not base64!")),
            Err(SyncError::InvalidAttachment(_))
        ));
        host.handle(ReceivedMessage::Attach(attach("not base64!"))).await;
        assert_eq!(error_code(&sent(&mut rx)[0]), Some(400));

        // Well-formed, but there is nowhere to upload to
        host.handle(ReceivedMessage::Attach(attach("iVBORw=="))).await;
        assert_eq!(error_code(&sent(&mut rx)[0]), Some(502));
        host.sessions.close_all().await;
    }
}
