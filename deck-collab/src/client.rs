//! Collaboration client: one actor that owns the whole sync core.
//!
//! ```text
//!            commands                    link events              timers
//!               │                             │                      │
//!               ▼                             ▼                      ▼
//!  ┌──────────────────────────── CollabClient::step ──────────────────────────┐
//!  │ local op ─► Session (permission check, optimistic apply, normalize)      │
//!  │          ─► PendingUpdates.mark ─► ConnectionManager.send | OfflineQueue │
//!  │ frame    ─► HubEvent::decode ─► Reconciler ─► Session/DocumentStore      │
//!  │ timer    ─► pending expiry | debounced flush | reconnect attempt         │
//!  └──────────────────────────────────┬───────────────────────────────────────┘
//!                                     ▼
//!                               UiEvent channel
//! ```
//!
//! Every handler runs to completion before the next one starts; the only
//! suspension points are link sends, connects and REST calls. Nothing here
//! returns an error for a transient failure: sends report a [`SendOutcome`]
//! and connection trouble becomes [`ConnectionStatus`] events.

use deck_core::model::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use deck_core::{normalize, sanitize, Role, Slide, TextBlock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus, Retry};
use crate::events::{EventSink, NotificationKind, UiEvent};
use crate::offline::{OfflineQueue, QueuedOp};
use crate::pending::PendingUpdates;
use crate::protocol::{
    HubEvent, HubRequest, RoleChangeRequest, SessionMembership, TextBlockDelete, TextBlockUpdate,
};
use crate::reconcile::{ApplyOutcome, Reconciler, RemoteUpdate};
use crate::rest::{JoinedPresentation, RestClient, RestError};
use crate::session::{unix_millis, LocalChange, LocalUser, Session, StylePatch};
use crate::timers::{TimerKind, Timers};
use crate::transport::{Connector, HubLink, LinkEvent};

/// Placeholder content of a freshly added block.
pub const NEW_BLOCK_CONTENT: &str = "Click to edit text...";
/// Position of a freshly added block.
pub const NEW_BLOCK_POSITION: (u32, u32) = (100, 100);

/// How an outbound operation was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live link
    Sent,
    /// Stored in the offline queue for replay
    Queued,
    /// Delivered through the REST fallback
    Fallback,
    /// Nothing to send (no session, or not permitted)
    Skipped,
}

/// Requests from the UI layer, for driving the client with [`CollabClient::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddTextBlock,
    MoveTextBlock { id: String, x: u32, y: u32 },
    ResizeTextBlock { id: String, width: u32, height: u32 },
    RestyleTextBlock { id: String, style: StylePatch },
    EditContent { id: String, content: String },
    /// A whole edited block as the UI committed it; sanitized before use
    CommitEdit(Value),
    BeginEdit { id: String },
    EndEdit,
    DeleteTextBlock { id: String },
    Select { id: Option<String> },
    GoToSlide { index: usize },
    AddSlide,
    ChangeRole { user_id: String, role: Role },
    Join { presentation_id: String },
    Leave,
    Save,
    Visibility { visible: bool },
    Reconnect,
    Shutdown,
}

pub struct CollabClient<C: Connector> {
    config: ClientConfig,
    connector: C,
    connection: ConnectionManager,
    session: Session,
    pending: PendingUpdates,
    queue: OfflineQueue,
    reconciler: Reconciler,
    timers: Timers,
    rest: Option<RestClient>,
    events: EventSink,
    event_rx: Option<mpsc::UnboundedReceiver<UiEvent>>,
    visible: bool,
}

impl<C: Connector> CollabClient<C> {
    pub fn new(config: ClientConfig, user: LocalUser, connector: C) -> Self {
        let (events, event_rx) = EventSink::channel();
        Self {
            connection: ConnectionManager::new(config.max_reconnect_attempts, config.reconnect_base_delay),
            pending: PendingUpdates::new(config.pending_window),
            queue: OfflineQueue::new(config.offline_queue_capacity),
            session: Session::new(user),
            reconciler: Reconciler::new(),
            timers: Timers::new(),
            rest: None,
            events,
            event_rx: Some(event_rx),
            visible: true,
            config,
            connector,
        }
    }

    /// Enable the REST paths (join by id, save, add slide, role fallback).
    pub fn with_rest(mut self, rest: RestClient) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Take the UI event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<UiEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn emit_status(&self) {
        self.events.emit(UiEvent::ConnectionStatusChanged(self.connection.status()));
    }

    fn membership(&self) -> Option<SessionMembership> {
        Some(SessionMembership {
            presentation_id: self.session.presentation_id()?.to_string(),
            user_id: self.session.user().id.clone(),
        })
    }

    // ─── Connection lifecycle ──────────────────────────────────────

    /// Connect to the hub. A no-op when already connected; failures are
    /// handled internally (retry scheduling or terminal failure).
    pub async fn connect(&mut self) {
        if !self.connection.begin_connect() {
            return;
        }
        if self.connection.state() == ConnectionState::Connecting {
            self.emit_status();
        }
        let url = self.config.hub_url.clone();
        match self.connector.connect(&url).await {
            Ok(link) => self.on_connected(link).await,
            Err(e) => {
                log::warn!("Connect to {url} failed: {e}");
                self.on_connection_failure();
            }
        }
    }

    /// Rejoin, replay the offline queue, then resync (after a reconnect).
    async fn on_connected(&mut self, link: HubLink) {
        let was_reconnect = self.connection.established(link);
        self.timers.cancel_reconnect();
        log::info!(
            "{} to hub at {}",
            if was_reconnect { "Reconnected" } else { "Connected" },
            self.config.hub_url
        );
        self.emit_status();

        if let Some(membership) = self.membership() {
            if let Err(e) = self.connection.send(&HubRequest::JoinSession(membership)).await {
                self.on_link_lost(Some(e.to_string()));
                return;
            }
        }
        if !self.replay_offline_queue().await {
            return;
        }
        if was_reconnect {
            if let Some(membership) = self.membership() {
                if let Err(e) = self.connection.send(&HubRequest::SyncState(membership)).await {
                    self.on_link_lost(Some(e.to_string()));
                    return;
                }
            }
            self.events.notify(NotificationKind::Success, "Reconnected");
        }
    }

    /// Send every queued operation in order. On failure the unsent tail
    /// goes back to the head of the queue and `false` is returned.
    async fn replay_offline_queue(&mut self) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        let entries = self.queue.drain();
        log::info!("Replaying {} queued operations", entries.len());
        let mut entries = entries.into_iter();
        while let Some(entry) = entries.next() {
            if let QueuedOp::Update(update) = &entry.op {
                let id = update.text_block.id.clone();
                self.mark_pending(&id);
            }
            let request = entry.op.clone().into_request();
            if let Err(e) = self.connection.send(&request).await {
                log::warn!("Replay interrupted: {e}");
                let mut unsent = vec![entry];
                unsent.extend(entries);
                self.queue.requeue_front(unsent);
                self.on_link_lost(Some(e.to_string()));
                return false;
            }
        }
        true
    }

    fn on_link_lost(&mut self, reason: Option<String>) {
        match reason {
            Some(reason) => log::warn!("Hub connection lost: {reason}"),
            None => log::warn!("Hub connection lost"),
        }
        self.on_connection_failure();
    }

    fn on_connection_failure(&mut self) {
        match self.connection.on_failure() {
            Retry::After(delay) => {
                log::info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    self.connection.attempts(),
                    self.connection.max_attempts()
                );
                self.timers.schedule_reconnect(Instant::now() + delay);
            }
            Retry::GiveUp => {
                log::error!(
                    "Giving up on the hub after {} attempts",
                    self.connection.attempts()
                );
                self.events.notify(
                    NotificationKind::Error,
                    "Connection lost. Reconnect manually to continue.",
                );
            }
        }
        self.emit_status();
    }

    /// Manual reconnect: forget earlier failures and connect now.
    pub async fn reconnect(&mut self) {
        self.connection.reset_attempts();
        self.timers.cancel_reconnect();
        self.connect().await;
    }

    /// Report document visibility. Regaining visibility after retries ran
    /// out makes one more connect attempt.
    pub async fn set_visibility(&mut self, visible: bool) {
        let regained = visible && !self.visible;
        self.visible = visible;
        if regained && self.connection.is_exhausted() {
            log::info!("Visible again; retrying the hub once");
            self.connect().await;
        }
    }

    /// Close the link without triggering a reconnect.
    pub async fn shutdown(&mut self) {
        self.timers.cancel_reconnect();
        self.connection.close().await;
        self.emit_status();
    }

    // ─── Outbound ──────────────────────────────────────────────────

    fn mark_pending(&mut self, id: &str) {
        let deadline = self.pending.mark_pending(id, Instant::now());
        self.timers.schedule(deadline, TimerKind::PendingExpiry { id: id.to_string() });
    }

    fn enqueue(&mut self, op: QueuedOp) -> SendOutcome {
        log::debug!("Queueing {:?} while offline", op.kind());
        self.queue.enqueue(op, Instant::now());
        SendOutcome::Queued
    }

    pub async fn send_update(&mut self, slide_index: usize, block: TextBlock) -> SendOutcome {
        let Some(presentation_id) = self.session.presentation_id().map(str::to_string) else {
            return SendOutcome::Skipped;
        };
        let update = TextBlockUpdate {
            presentation_id,
            slide_index,
            text_block: normalize(block),
            user_id: self.session.user().id.clone(),
        };
        if !self.connection.is_connected() {
            return self.enqueue(QueuedOp::Update(update));
        }
        let id = update.text_block.id.clone();
        self.mark_pending(&id);
        match self.connection.send(&HubRequest::UpdateTextBlock(update.clone())).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                log::warn!("Update of {id} failed: {e}");
                self.pending.clear(&id);
                self.enqueue(QueuedOp::Update(update))
            }
        }
    }

    pub async fn send_delete(&mut self, slide_index: usize, id: &str) -> SendOutcome {
        let Some(presentation_id) = self.session.presentation_id().map(str::to_string) else {
            return SendOutcome::Skipped;
        };
        let delete = TextBlockDelete {
            presentation_id,
            slide_index,
            text_block_id: id.to_string(),
            user_id: self.session.user().id.clone(),
        };
        if !self.connection.is_connected() {
            return self.enqueue(QueuedOp::Delete(delete));
        }
        match self.connection.send(&HubRequest::DeleteTextBlock(delete.clone())).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                log::warn!("Delete of {id} failed: {e}");
                self.enqueue(QueuedOp::Delete(delete))
            }
        }
    }

    /// Send a role change. When the hub send fails on a live link the REST
    /// endpoint is tried before queueing.
    pub async fn send_role_change(&mut self, user_id: &str, role: Role) -> SendOutcome {
        let Some(presentation_id) = self.session.presentation_id().map(str::to_string) else {
            return SendOutcome::Skipped;
        };
        let change = RoleChangeRequest {
            presentation_id,
            user_id: user_id.to_string(),
            new_role: role,
            requester_id: self.session.user().id.clone(),
        };
        if !self.connection.is_connected() {
            return self.enqueue(QueuedOp::RoleChange(change));
        }
        let err = match self.connection.send(&HubRequest::ChangeUserRole(change.clone())).await {
            Ok(()) => return SendOutcome::Sent,
            Err(e) => e,
        };
        log::warn!("Role change via hub failed: {err}; trying REST");
        if let Some(rest) = &self.rest {
            match rest
                .change_role(&change.presentation_id, &change.user_id, change.new_role, &change.requester_id)
                .await
            {
                Ok(()) => return SendOutcome::Fallback,
                Err(e) => log::error!("Role change via REST failed: {e}"),
            }
        }
        self.enqueue(QueuedOp::RoleChange(change))
    }

    // ─── Local operations ──────────────────────────────────────────

    /// Add a default block to the current slide; it becomes selected.
    pub async fn add_text_block(&mut self) -> Option<TextBlock> {
        let (x, y) = NEW_BLOCK_POSITION;
        let mut block = TextBlock::new(Uuid::new_v4().to_string())
            .at(x, y)
            .sized(DEFAULT_WIDTH, DEFAULT_HEIGHT)
            .with_content(NEW_BLOCK_CONTENT);
        block.created_by = self.session.user().id.clone();
        block.timestamp = unix_millis();

        let change = self.session.add_text_block(block)?;
        self.events.emit(UiEvent::ElementCreated {
            slide_index: change.slide_index,
            handle: change.handle,
            block: change.block.clone(),
        });
        self.events.emit(UiEvent::SelectionChanged {
            selected: Some(change.handle),
        });
        self.send_update(change.slide_index, change.block.clone()).await;
        Some(change.block)
    }

    /// Emit and send a local change immediately. Supersedes any debounced
    /// content edit of the same block.
    async fn commit(&mut self, change: LocalChange) -> TextBlock {
        self.timers.cancel_debounce(&change.block.id);
        self.events.emit(UiEvent::ElementUpdated {
            slide_index: change.slide_index,
            handle: change.handle,
            block: change.block.clone(),
        });
        self.send_update(change.slide_index, change.block.clone()).await;
        change.block
    }

    pub async fn move_text_block(&mut self, id: &str, x: u32, y: u32) -> Option<TextBlock> {
        let change = self.session.move_text_block(id, x, y)?;
        Some(self.commit(change).await)
    }

    pub async fn resize_text_block(&mut self, id: &str, width: u32, height: u32) -> Option<TextBlock> {
        let change = self.session.resize_text_block(id, width, height)?;
        Some(self.commit(change).await)
    }

    pub async fn restyle_text_block(&mut self, id: &str, style: StylePatch) -> Option<TextBlock> {
        let change = self.session.restyle_text_block(id, style)?;
        Some(self.commit(change).await)
    }

    /// Commit a whole block as the UI reports it. The payload is sanitized;
    /// blocks that do not exist yet are added to the current slide.
    pub async fn commit_edit(&mut self, raw: &Value) -> Option<TextBlock> {
        let incoming = sanitize(raw);
        if incoming.id.is_empty() {
            return None;
        }
        if self.session.store().find_text_block(&incoming.id).is_none() {
            let change = self.session.add_text_block(incoming)?;
            self.events.emit(UiEvent::ElementCreated {
                slide_index: change.slide_index,
                handle: change.handle,
                block: change.block.clone(),
            });
            self.send_update(change.slide_index, change.block.clone()).await;
            return Some(change.block);
        }
        let id = incoming.id.clone();
        let change = self.session.modify_text_block(&id, |b| *b = incoming)?;
        Some(self.commit(change).await)
    }

    /// Change text content locally; the send is debounced and a newer edit
    /// restarts the window.
    pub fn edit_text_content(&mut self, id: &str, content: impl Into<String>) -> Option<TextBlock> {
        let change = self.session.edit_text_content(id, content)?;
        self.events.emit(UiEvent::ElementUpdated {
            slide_index: change.slide_index,
            handle: change.handle,
            block: change.block.clone(),
        });
        self.timers.debounce(id, Instant::now() + self.config.debounce_window);
        Some(change.block)
    }

    async fn flush_edit(&mut self, id: &str) {
        let Some((slide_index, block)) = self
            .session
            .store()
            .find_text_block(id)
            .map(|(index, block)| (index, block.clone()))
        else {
            return;
        };
        self.send_update(slide_index, block).await;
    }

    /// Focus a block for editing.
    pub fn begin_edit(&mut self, id: &str) -> bool {
        if !self.session.begin_edit(id) {
            return false;
        }
        self.events.emit(UiEvent::SelectionChanged {
            selected: self.session.store().handle(id),
        });
        true
    }

    /// Blur: flush the debounced edit now, then apply any remote update
    /// deferred while the block was being edited. A deferred version that
    /// differs from the local one is sent back out, so the hub and peers end
    /// up with the block shown here.
    pub async fn end_edit(&mut self) -> Option<ApplyOutcome> {
        let id = self.session.end_edit()?;
        if self.timers.cancel_debounce(&id) {
            self.flush_edit(&id).await;
        }
        let before = self.session.store().find_text_block(&id).map(|(_, block)| block.clone());
        let outcome = self.reconciler.on_edit_end(&mut self.session, &self.events, &id);
        if outcome == Some(ApplyOutcome::Updated) {
            log::debug!("Applied deferred update to {id}");
            let after = self
                .session
                .store()
                .find_text_block(&id)
                .map(|(index, block)| (index, block.clone()));
            if let Some((slide_index, block)) = after {
                if before.as_ref() != Some(&block) && self.session.can_edit() {
                    self.send_update(slide_index, block).await;
                }
            }
        }
        outcome
    }

    pub async fn delete_text_block(&mut self, id: &str) -> bool {
        let was_selected = self.session.selected() == Some(id);
        let Some((slide_index, _, handle)) = self.session.delete_text_block(id) else {
            return false;
        };
        self.timers.cancel_debounce(id);
        self.reconciler.forget(id);
        if was_selected {
            self.events.emit(UiEvent::SelectionChanged { selected: None });
        }
        self.events.emit(UiEvent::ElementRemoved {
            slide_index,
            handle,
            id: id.to_string(),
        });
        self.send_delete(slide_index, id).await;
        true
    }

    pub fn select(&mut self, id: Option<&str>) -> bool {
        if !self.session.select(id) {
            return false;
        }
        self.events.emit(UiEvent::SelectionChanged {
            selected: id.and_then(|id| self.session.store().handle(id)),
        });
        true
    }

    pub fn go_to_slide(&mut self, index: usize) -> bool {
        if !self.session.go_to_slide(index) {
            return false;
        }
        self.events.emit(UiEvent::SlideLoaded { index });
        true
    }

    /// Append a slide through the REST API and show it.
    pub async fn add_slide(&mut self) -> Option<Slide> {
        if !self.session.can_manage_users() {
            return None;
        }
        let membership = self.membership()?;
        let Some(rest) = self.rest.clone() else {
            log::warn!("Cannot add a slide without a REST client");
            return None;
        };
        let index = self.session.store().slide_count();
        match rest
            .add_slide(&membership.presentation_id, &membership.user_id, index)
            .await
        {
            Ok(slide) => {
                let index = self.session.store.add_slide(slide.clone());
                self.session.go_to_slide(index);
                self.events.emit(UiEvent::SlidesChanged {
                    count: self.session.store().slide_count(),
                });
                self.events.emit(UiEvent::SlideLoaded { index });
                Some(slide)
            }
            Err(e) => {
                log::error!("Failed to add slide: {e}");
                self.events.notify(NotificationKind::Error, "Failed to add slide");
                None
            }
        }
    }

    /// Change another participant's role. The roster changes when the hub
    /// confirms with `UserRoleChanged`.
    pub async fn change_user_role(&mut self, user_id: &str, role: Role) -> SendOutcome {
        let known = self.session.roster().iter().any(|u| u.id == user_id);
        if !self.session.can_manage_users() || self.session.is_local_user(user_id) || !known {
            return SendOutcome::Skipped;
        }
        self.send_role_change(user_id, role).await
    }

    // ─── Session lifecycle ─────────────────────────────────────────

    /// Open a presentation returned by the join endpoint and, if
    /// connected, join its hub session.
    pub async fn open_presentation(&mut self, joined: JoinedPresentation) {
        let slides = joined.slides_or_default();
        let users = joined.users.unwrap_or_default();
        log::info!(
            "Opening presentation {} ({} slides, {} users)",
            joined.presentation.id,
            slides.len(),
            users.len()
        );
        self.session.open(joined.presentation, slides, users);
        self.reconciler.clear();
        self.events.emit(UiEvent::SlidesChanged {
            count: self.session.store().slide_count(),
        });
        self.events.emit(UiEvent::SlideLoaded { index: 0 });
        self.events.emit(UiEvent::RosterChanged {
            users: self.session.roster().to_vec(),
        });
        self.events.emit(UiEvent::PermissionsChanged(self.session.permissions()));

        if self.connection.is_connected() {
            if let Some(membership) = self.membership() {
                if let Err(e) = self.connection.send(&HubRequest::JoinSession(membership)).await {
                    log::warn!("Join failed: {e}");
                }
            }
        }
    }

    /// Join a presentation by id through the REST API.
    pub async fn join_presentation(&mut self, presentation_id: &str) -> Result<(), RestError> {
        let rest = self.rest.clone().ok_or(RestError::NotConfigured)?;
        let joined = rest
            .join_presentation(presentation_id, &self.session.user().id)
            .await?;
        self.open_presentation(joined).await;
        Ok(())
    }

    /// Leave the hub session and close the presentation locally.
    pub async fn leave_presentation(&mut self) {
        if let Some(membership) = self.membership() {
            if self.connection.is_connected() {
                if let Err(e) = self.connection.send(&HubRequest::LeaveSession(membership)).await {
                    log::warn!("Leave failed: {e}");
                }
            }
        }
        self.session.close();
        self.reconciler.clear();
        self.events.emit(UiEvent::SlidesChanged { count: 0 });
        self.events.emit(UiEvent::RosterChanged { users: Vec::new() });
    }

    /// Save the full slide set through the REST API.
    pub async fn save(&mut self) -> Result<(), RestError> {
        let rest = self.rest.clone().ok_or(RestError::NotConfigured)?;
        let membership = self.membership().ok_or(RestError::NoSession)?;
        rest.save_slides(
            &membership.presentation_id,
            &membership.user_id,
            self.session.store().slides(),
        )
        .await?;
        self.events.notify(NotificationKind::Success, "Saved");
        Ok(())
    }

    // ─── Inbound ───────────────────────────────────────────────────

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame(frame) => self.handle_frame(&frame),
            LinkEvent::Closed(reason) => self.on_link_lost(reason),
        }
    }

    /// Decode and apply one hub frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, frame: &str) {
        let event = match HubEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping malformed hub frame: {e}");
                return;
            }
        };
        if !self.session.is_active() {
            log::debug!("Ignoring {} outside a session", event.name());
            return;
        }
        log::debug!("Hub event {}", event.name());

        let now = Instant::now();
        let Self {
            session,
            pending,
            events,
            reconciler,
            timers,
            ..
        } = self;
        match event {
            HubEvent::TextBlockUpdated {
                text_block,
                user_id,
                slide_index,
            } => {
                let update = RemoteUpdate {
                    block: text_block,
                    user_id,
                    slide_index,
                };
                reconciler.apply_remote_update(session, pending, events, update, now);
            }
            HubEvent::TextBlockDeleted { text_block_id, .. } => {
                timers.cancel_debounce(&text_block_id);
                reconciler.apply_remote_delete(session, events, &text_block_id);
            }
            HubEvent::UserRoleChanged { user_id, role } => {
                let editing = session.editing().map(str::to_string);
                reconciler.apply_role_change(session, events, &user_id, role);
                Self::cancel_abandoned_edit(session, timers, editing);
            }
            HubEvent::UserJoined(user) => reconciler.user_joined(session, events, user),
            HubEvent::UserLeft { user_id } => reconciler.user_left(session, events, &user_id),
            HubEvent::SlideChanged { slide_index } => {
                reconciler.slide_changed(session, events, slide_index);
            }
            HubEvent::SlideContentUpdated { slide_index, content } => {
                reconciler.replace_slide_content(session, pending, events, slide_index, content, now);
            }
            HubEvent::PresentationUpdated(state) => {
                let editing = session.editing().map(str::to_string);
                reconciler.apply_presentation_state(session, pending, events, state, now);
                Self::cancel_abandoned_edit(session, timers, editing);
            }
            HubEvent::SlideAdded(slide) => reconciler.slide_added(session, events, slide),
            HubEvent::SlideRemoved { slide_index } => {
                reconciler.slide_removed(session, events, slide_index);
            }
        }
    }

    /// Edit focus was taken away by the hub (demotion, block gone): the
    /// debounced content must not be sent.
    fn cancel_abandoned_edit(session: &Session, timers: &mut Timers, editing: Option<String>) {
        if let Some(id) = editing {
            if !session.is_editing(&id) && timers.cancel_debounce(&id) {
                log::debug!("Dropped debounced edit of {id}");
            }
        }
    }

    /// Handle every link event that has already arrived.
    pub fn process_pending_frames(&mut self) {
        while let Some(event) = self.connection.try_next_event() {
            self.handle_link_event(event);
        }
    }

    /// Run every timer whose deadline has passed.
    pub async fn fire_due_timers(&mut self) {
        while let Some(kind) = self.timers.pop_due(Instant::now()) {
            match kind {
                TimerKind::PendingExpiry { id } => {
                    if self.pending.expire(&id, Instant::now()) {
                        log::trace!("Pending mark for {id} expired");
                    }
                }
                TimerKind::Debounce { id, .. } => self.flush_edit(&id).await,
                TimerKind::Reconnect { .. } => {
                    log::info!(
                        "Reconnect attempt {}/{}",
                        self.connection.attempts(),
                        self.connection.max_attempts()
                    );
                    self.connect().await;
                }
            }
        }
    }

    /// Drain inbound events and due timers without waiting.
    pub async fn pump(&mut self) {
        self.process_pending_frames();
        self.fire_due_timers().await;
        self.process_pending_frames();
    }

    // ─── Event loop ────────────────────────────────────────────────

    /// Wait for the next link event, timer or command and handle it.
    /// Returns `false` once the client has shut down.
    pub async fn step(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let deadline = self.timers.next_deadline();
        tokio::select! {
            biased;
            event = self.connection.next_event() => self.handle_link_event(event),
            _ = sleep_until(deadline) => self.fire_due_timers().await,
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => {
                    self.shutdown().await;
                    return false;
                }
                Some(command) => self.execute(command).await,
            },
        }
        true
    }

    /// Drive the client until `Shutdown` arrives or the command channel
    /// closes. Call [`CollabClient::connect`] first to go online.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while self.step(&mut commands).await {}
        log::info!("Collaboration client stopped");
    }

    pub async fn execute(&mut self, command: Command) {
        match command {
            Command::AddTextBlock => {
                self.add_text_block().await;
            }
            Command::MoveTextBlock { id, x, y } => {
                self.move_text_block(&id, x, y).await;
            }
            Command::ResizeTextBlock { id, width, height } => {
                self.resize_text_block(&id, width, height).await;
            }
            Command::RestyleTextBlock { id, style } => {
                self.restyle_text_block(&id, style).await;
            }
            Command::EditContent { id, content } => {
                self.edit_text_content(&id, content);
            }
            Command::CommitEdit(raw) => {
                self.commit_edit(&raw).await;
            }
            Command::BeginEdit { id } => {
                self.begin_edit(&id);
            }
            Command::EndEdit => {
                self.end_edit().await;
            }
            Command::DeleteTextBlock { id } => {
                self.delete_text_block(&id).await;
            }
            Command::Select { id } => {
                self.select(id.as_deref());
            }
            Command::GoToSlide { index } => {
                self.go_to_slide(index);
            }
            Command::AddSlide => {
                self.add_slide().await;
            }
            Command::ChangeRole { user_id, role } => {
                self.change_user_role(&user_id, role).await;
            }
            Command::Join { presentation_id } => {
                if let Err(e) = self.join_presentation(&presentation_id).await {
                    log::error!("Failed to join presentation {presentation_id}: {e}");
                    self.events.notify(NotificationKind::Error, "Failed to join presentation");
                }
            }
            Command::Leave => self.leave_presentation().await,
            Command::Save => {
                if let Err(e) = self.save().await {
                    log::error!("Failed to save presentation: {e}");
                    self.events.notify(NotificationKind::Error, "Failed to save presentation");
                }
            }
            Command::Visibility { visible } => self.set_visibility(visible).await,
            Command::Reconnect => self.reconnect().await,
            Command::Shutdown => self.shutdown().await,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => futures_util::future::pending().await,
    }
}
