use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::clients::{UploadClient, UploadFile, UploadedFile};
use crate::db::{SharedStore, Subscription};
use crate::error::{StoreError, SyncError};
use crate::models::{
    CollaboratorsView, Document, DocumentPatch, Identity, Permission, Presence, SaveStatus, SessionView, ANONYMOUS,
};
use crate::services::presence_service::{self, run_heartbeat, PresenceSettings, PresenceTracker};
use crate::services::sync_scheduler::{EditOutcome, RemoteDecision, SaveTicket, SyncScheduler};
use crate::services::access_service;
use crate::utils::SharedClock;

/// Name written when the user clears the document title.
pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub autosave_debounce: Duration,
    pub presence: PresenceSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            autosave_debounce: Duration::from_millis(60_000),
            presence: PresenceSettings::default(),
        }
    }
}

/// Everything a session needs from its surroundings.
#[derive(Clone)]
pub struct SessionContext {
    pub store: SharedStore,
    pub clock: SharedClock,
    pub settings: SyncSettings,
}

impl SessionContext {
    pub fn new(store: SharedStore, clock: SharedClock, settings: SyncSettings) -> Self {
        Self { store, clock, settings }
    }
}

/// Pure projection of a stored document for a caller holding `permission`.
pub fn render_view(
    doc: &Document,
    permission: Permission,
    self_presence: Option<&str>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> SessionView {
    SessionView {
        doc_id: doc.id.clone(),
        name: doc.name.clone(),
        content: doc.content.clone(),
        permission,
        read_only: !permission.can_edit(),
        status: SaveStatus::Saved,
        dirty: false,
        last_modified: doc.last_modified,
        collaborators: presence_service::render_collaborators(&doc.active_users, self_presence, now, stale_after),
    }
}

fn save_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        UNTITLED.to_string()
    } else {
        name.to_string()
    }
}

// Token-only editors have no identity of their own.
fn presence_identity(identity: Option<&Identity>, token: Option<&str>) -> (String, String) {
    match identity {
        Some(identity) => (identity.id.clone(), identity.display_name().to_string()),
        None => (format!("anon_{}", token.unwrap_or_default()), ANONYMOUS.to_string()),
    }
}

enum SessionCommand {
    Edit { content: String },
    Rename { name: String },
    Focus(bool),
    Save { reply: oneshot::Sender<Result<(), SyncError>> },
    Close { reply: oneshot::Sender<()> },
}

/// Handle to one open document session.
///
/// The session itself runs as a single task that serializes local edits,
/// remote notifications, the autosave deadline and save completions. Dropping
/// the handle tears the session down just like [`DocumentSession::close`],
/// without waiting for it.
pub struct DocumentSession {
    doc_id: String,
    permission: Permission,
    presence_id: Option<String>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    task: Option<JoinHandle<()>>,
}

impl DocumentSession {
    /// Open `doc_id` for `identity` and/or a share `token`.
    ///
    /// Fails with `DocumentNotFound` or `AccessDenied` before subscribing or
    /// registering any presence.
    pub async fn open(
        ctx: &SessionContext,
        doc_id: &str,
        identity: Option<&Identity>,
        token: Option<&str>,
    ) -> Result<Self, SyncError> {
        let doc = ctx
            .store
            .get(doc_id)
            .await?
            .ok_or_else(|| SyncError::DocumentNotFound(doc_id.to_string()))?;

        let permission = access_service::evaluate(&doc, identity.map(|i| i.id.as_str()), token)?;
        let subscription = ctx.store.subscribe(doc_id).await?;

        let (tracker, heartbeat) = if permission.can_edit() {
            let (who, display_name) = presence_identity(identity, token);
            let mut tracker = PresenceTracker::new(ctx.store.clone(), doc_id, ctx.clock.clone(), ctx.settings.presence);
            if let Err(e) = tracker.register(&who, &display_name).await {
                warn!("Presence registration on document {} failed: {}", doc_id, e);
            }
            // The cadence counts from registration, not from when the task first runs.
            let first_beat = Instant::now() + ctx.settings.presence.heartbeat_interval;
            let tracker = Arc::new(tracker);
            let heartbeat = tokio::spawn(run_heartbeat(tracker.clone(), first_beat));
            (Some(tracker), Some(heartbeat))
        } else {
            (None, None)
        };
        let presence_id = tracker.as_ref().and_then(|t| t.presence_id().map(str::to_string));

        let scheduler = if permission.can_edit() {
            SyncScheduler::editable(ctx.settings.autosave_debounce, doc.last_modified)
        } else {
            SyncScheduler::read_only(doc.last_modified)
        };

        let initial = render_view(
            &doc,
            permission,
            presence_id.as_deref(),
            ctx.clock.now(),
            ctx.settings.presence.stale_after,
        );
        let (view_tx, view_rx) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session_loop = SessionLoop {
            ctx: ctx.clone(),
            doc_id: doc_id.to_string(),
            permission,
            scheduler,
            name: doc.name,
            content: doc.content,
            focused: false,
            active_users: doc.active_users,
            tracker,
            heartbeat,
            view_tx,
            inflight_waiters: Vec::new(),
            queued_waiters: Vec::new(),
        };
        let task = tokio::spawn(session_loop.run(command_rx, subscription));

        info!(
            "Opened document {} with permission {} (presence {:?})",
            doc_id, permission, presence_id
        );
        Ok(Self {
            doc_id: doc_id.to_string(),
            permission,
            presence_id,
            commands: command_tx,
            view: view_rx,
            task: Some(task),
        })
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn is_read_only(&self) -> bool {
        !self.permission.can_edit()
    }

    pub fn presence_id(&self) -> Option<&str> {
        self.presence_id.as_deref()
    }

    /// Latest rendered state of the session.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every change of the rendered state.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    fn send(&self, command: SessionCommand) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| SyncError::SessionClosed)
    }

    fn ensure_editable(&self) -> Result<(), SyncError> {
        if self.is_read_only() {
            Err(SyncError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Replace the local draft content.
    pub fn edit(&self, content: impl Into<String>) -> Result<(), SyncError> {
        self.ensure_editable()?;
        self.send(SessionCommand::Edit { content: content.into() })
    }

    pub fn rename(&self, name: impl Into<String>) -> Result<(), SyncError> {
        self.ensure_editable()?;
        self.send(SessionCommand::Rename { name: name.into() })
    }

    /// Whether the user's editor currently has focus.
    pub fn set_focused(&self, focused: bool) -> Result<(), SyncError> {
        self.send(SessionCommand::Focus(focused))
    }

    /// Persist the draft now, whatever the autosave state.
    ///
    /// The request is queued on the session immediately; the returned future
    /// only waits for the result and does not borrow the handle.
    pub fn save_now(&self) -> impl Future<Output = Result<(), SyncError>> + Send + 'static {
        let requested = self.ensure_editable().and_then(|()| {
            let (reply, rx) = oneshot::channel();
            self.send(SessionCommand::Save { reply }).map(|()| rx)
        });
        async move { requested?.await.map_err(|_| SyncError::SessionClosed)? }
    }

    fn check_attachment(&self, file: &UploadFile) -> Result<(), SyncError> {
        self.ensure_editable()?;
        if !file.is_image() {
            return Err(SyncError::InvalidAttachment(format!(
                "'{}' is not an image ({})",
                file.file_name, file.mime_type
            )));
        }
        Ok(())
    }

    /// Upload an image to embed in the document. Checked against the
    /// session's permission before anything is sent.
    pub fn upload_attachment(
        &self,
        client: &UploadClient,
        file: UploadFile,
    ) -> impl Future<Output = Result<UploadedFile, SyncError>> + Send + 'static {
        let checked = self.check_attachment(&file);
        let client = client.clone();
        async move {
            checked?;
            client.upload(file).await
        }
    }

    /// Tear the session down and wait until presence and subscription are released.
    pub async fn close(mut self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::Close { reply }).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Session task for document {} ended abnormally: {}", self.doc_id, e);
            }
        }
    }
}

type SaveFuture = BoxFuture<'static, (SaveTicket, Result<(), StoreError>)>;
type SaveReply = oneshot::Sender<Result<(), SyncError>>;

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_save(save: &mut Option<SaveFuture>) -> (SaveTicket, Result<(), StoreError>) {
    match save.as_mut() {
        Some(save) => save.await,
        None => std::future::pending().await,
    }
}

struct SessionLoop {
    ctx: SessionContext,
    doc_id: String,
    permission: Permission,
    scheduler: SyncScheduler,
    name: String,
    content: String,
    focused: bool,
    active_users: Vec<Presence>,
    tracker: Option<Arc<PresenceTracker>>,
    heartbeat: Option<JoinHandle<()>>,
    view_tx: watch::Sender<SessionView>,
    inflight_waiters: Vec<SaveReply>,
    queued_waiters: Vec<SaveReply>,
}

impl SessionLoop {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>, mut changes: Subscription) {
        let mut in_flight: Option<SaveFuture> = None;
        let mut feed_open = true;
        let mut close_reply = None;

        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    None => break,
                    Some(SessionCommand::Close { reply }) => {
                        close_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command, &mut in_flight),
                },
                change = changes.recv(), if feed_open => match change {
                    Some(doc) => self.on_remote(doc),
                    None => {
                        warn!("Change feed of document {} ended", self.doc_id);
                        feed_open = false;
                    }
                },
                _ = wait_deadline(deadline) => {
                    debug!("Autosave deadline reached for document {}", self.doc_id);
                    if let Some(ticket) = self.scheduler.debounce_elapsed(self.ctx.clock.now()) {
                        in_flight = Some(self.start_save(ticket));
                    }
                    self.publish();
                },
                (ticket, result) = wait_save(&mut in_flight) => {
                    in_flight = None;
                    self.on_save_finished(ticket, result, &mut in_flight);
                },
            }
        }

        // Saves are never cancelled; let the one in flight land first.
        while let Some(save) = in_flight.take() {
            let (ticket, result) = save.await;
            self.on_save_finished(ticket, result, &mut in_flight);
        }
        self.teardown().await;
        drop(changes);
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: SessionCommand, in_flight: &mut Option<SaveFuture>) {
        match command {
            SessionCommand::Edit { content } => {
                if self.accept_edit() {
                    self.content = content;
                    self.publish();
                }
            }
            SessionCommand::Rename { name } => {
                if self.accept_edit() {
                    self.name = name;
                    self.publish();
                }
            }
            SessionCommand::Focus(focused) => {
                self.focused = focused;
            }
            SessionCommand::Save { reply } => {
                match self.scheduler.request_save(self.ctx.clock.now()) {
                    Ok(Some(ticket)) => {
                        self.inflight_waiters.push(reply);
                        *in_flight = Some(self.start_save(ticket));
                    }
                    Ok(None) => self.queued_waiters.push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
                self.publish();
            }
            SessionCommand::Close { .. } => {}
        }
    }

    fn accept_edit(&mut self) -> bool {
        match self.scheduler.local_edit(Instant::now()) {
            Ok(EditOutcome::Accepted) => true,
            Ok(EditOutcome::IgnoredDuringApply) => false,
            Err(e) => {
                warn!("Rejected local edit on document {}: {}", self.doc_id, e);
                false
            }
        }
    }

    fn start_save(&self, ticket: SaveTicket) -> SaveFuture {
        let patch = DocumentPatch::save(save_name(&self.name), self.content.clone(), ticket.saved_at);
        let store = self.ctx.store.clone();
        let doc_id = self.doc_id.clone();
        debug!("Saving document {} ({:?})", doc_id, ticket.trigger);
        Box::pin(async move {
            let result = store.update(&doc_id, patch).await;
            (ticket, result)
        })
    }

    fn on_save_finished(&mut self, ticket: SaveTicket, result: Result<(), StoreError>, in_flight: &mut Option<SaveFuture>) {
        let outcome = match result {
            Ok(()) => {
                info!("Document {} saved at {}", self.doc_id, ticket.saved_at);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save document {}: {}", self.doc_id, e);
                Err(e.to_string())
            }
        };
        let queued = self.scheduler.save_finished(ticket, outcome.is_ok());
        if outcome.is_ok() {
            self.refresh_presence();
        }
        self.publish();
        for waiter in self.inflight_waiters.drain(..) {
            let _ = waiter.send(outcome.clone().map_err(SyncError::SaveFailure));
        }

        if let Some(trigger) = queued {
            if let Some(next) = self.scheduler.begin_save(trigger, self.ctx.clock.now()) {
                self.inflight_waiters = std::mem::take(&mut self.queued_waiters);
                *in_flight = Some(self.start_save(next));
                self.publish();
            }
        }
    }

    // A successful save doubles as a heartbeat.
    fn refresh_presence(&self) {
        if let Some(tracker) = self.tracker.clone() {
            tokio::spawn(async move {
                if let Err(e) = tracker.heartbeat().await {
                    warn!("Presence refresh after save failed: {}", e);
                }
            });
        }
    }

    fn on_remote(&mut self, doc: Document) {
        self.active_users = doc.active_users;
        match self.scheduler.remote_update(doc.last_modified, self.focused) {
            RemoteDecision::Apply => {
                self.scheduler.begin_apply_remote();
                self.content = doc.content;
                self.name = doc.name;
                self.scheduler.finish_apply_remote();
                debug!("Applied remote version {} of document {}", doc.last_modified, self.doc_id);
            }
            RemoteDecision::Stale => {}
            dropped => {
                info!(
                    "Dropped remote version {} of document {} ({:?}); the next local save overwrites it",
                    doc.last_modified, self.doc_id, dropped
                );
            }
        }
        self.publish();
    }

    fn collaborators(&self) -> CollaboratorsView {
        let self_id = self.tracker.as_ref().and_then(|t| t.presence_id());
        presence_service::render_collaborators(
            &self.active_users,
            self_id,
            self.ctx.clock.now(),
            self.ctx.settings.presence.stale_after,
        )
    }

    fn publish(&self) {
        let view = SessionView {
            doc_id: self.doc_id.clone(),
            name: self.name.clone(),
            content: self.content.clone(),
            permission: self.permission,
            read_only: !self.permission.can_edit(),
            status: self.scheduler.status(),
            dirty: self.scheduler.is_dirty(),
            last_modified: self.scheduler.last_observed(),
            collaborators: self.collaborators(),
        };
        self.view_tx.send_replace(view);
    }

    async fn teardown(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if self.scheduler.is_dirty() {
            warn!("Closing document {} with unsaved changes", self.doc_id);
        }
        for waiter in self.queued_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::SessionClosed));
        }
        if let Some(tracker) = &self.tracker {
            match tracker.leave().await {
                Ok(removed) => debug!("Presence on document {} released (present: {})", self.doc_id, removed),
                Err(e) => warn!("Failed to release presence on document {}: {}", self.doc_id, e),
            }
        }
        info!("Closed document {}", self.doc_id);
    }
}
