//! In-process hub for tests and demos.
//!
//! Behaves like the real presentation hub at the protocol level: one room
//! per presentation, updates and deletes broadcast to every member of the
//! room (sender included, so clients see their own echoes), roster events
//! to everyone else, and `SyncState` answered with a full snapshot to the
//! requester only.
//!
//! Frames are handled synchronously inside [`FrameSink::send`], so by the
//! time a send returns every recipient already has the resulting event in
//! its inbound channel. Tests can take the hub offline and drop links to
//! exercise reconnection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use deck_core::{Presentation, Role, Slide, User};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::protocol::{HubEvent, HubRequest, PresentationState};
use crate::transport::{Connector, FrameSink, HubLink, LinkEvent, TransportError};

/// Hosted presentation: authoritative copy plus roster.
#[derive(Debug, Clone, Default)]
struct Room {
    presentation: Presentation,
    slides: Vec<Slide>,
    users: Vec<User>,
}

struct Member {
    tx: mpsc::UnboundedSender<LinkEvent>,
    presentation_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Default)]
struct HubState {
    online: bool,
    next_connection: u64,
    connections: HashMap<u64, Member>,
    rooms: HashMap<String, Room>,
    received: Vec<HubRequest>,
    connect_attempts: u32,
}

impl HubState {
    fn room_members(&self, presentation_id: &str) -> impl Iterator<Item = (&u64, &Member)> + '_ {
        let presentation_id = presentation_id.to_string();
        self.connections
            .iter()
            .filter(move |(_, m)| m.presentation_id.as_deref() == Some(presentation_id.as_str()))
    }

    /// Send to every member of the room, optionally skipping one connection.
    fn broadcast(&self, presentation_id: &str, event: &HubEvent, skip: Option<u64>) {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Loopback hub failed to encode {}: {e}", event.name());
                return;
            }
        };
        for (id, member) in self.room_members(presentation_id) {
            if Some(*id) != skip {
                let _ = member.tx.send(LinkEvent::Frame(frame.clone()));
            }
        }
    }

    fn reply(&self, connection: u64, event: &HubEvent) {
        if let (Some(member), Ok(frame)) = (self.connections.get(&connection), event.encode()) {
            let _ = member.tx.send(LinkEvent::Frame(frame));
        }
    }

    /// Remove a connection; the room hears `UserLeft`.
    fn disconnect(&mut self, connection: u64) -> Option<Member> {
        let member = self.connections.remove(&connection)?;
        if let (Some(presentation_id), Some(user_id)) = (&member.presentation_id, &member.user_id) {
            self.broadcast(
                presentation_id,
                &HubEvent::UserLeft {
                    user_id: user_id.clone(),
                },
                None,
            );
        }
        Some(member)
    }

    fn handle(&mut self, connection: u64, request: HubRequest) {
        self.received.push(request.clone());
        match request {
            HubRequest::JoinSession(join) => {
                let Some(room) = self.rooms.get_mut(&join.presentation_id) else {
                    log::warn!("Loopback hub: join for unknown presentation {}", join.presentation_id);
                    return;
                };
                let user = match room.users.iter().find(|u| u.id == join.user_id) {
                    Some(user) => user.clone(),
                    None => {
                        let user = User::new(join.user_id.clone(), join.user_id.clone(), Role::Viewer);
                        room.users.push(user.clone());
                        user
                    }
                };
                if let Some(member) = self.connections.get_mut(&connection) {
                    member.presentation_id = Some(join.presentation_id.clone());
                    member.user_id = Some(join.user_id.clone());
                }
                self.broadcast(&join.presentation_id, &HubEvent::UserJoined(user), Some(connection));
            }
            HubRequest::LeaveSession(leave) => {
                if let Some(member) = self.connections.get_mut(&connection) {
                    member.presentation_id = None;
                    member.user_id = None;
                }
                self.broadcast(
                    &leave.presentation_id,
                    &HubEvent::UserLeft {
                        user_id: leave.user_id,
                    },
                    None,
                );
            }
            HubRequest::UpdateTextBlock(update) => {
                if let Some(slide) = self
                    .rooms
                    .get_mut(&update.presentation_id)
                    .and_then(|room| room.slides.get_mut(update.slide_index))
                {
                    match slide.content.iter_mut().find(|b| b.id == update.text_block.id) {
                        Some(existing) => *existing = update.text_block.clone(),
                        None => slide.content.push(update.text_block.clone()),
                    }
                }
                self.broadcast(
                    &update.presentation_id,
                    &HubEvent::TextBlockUpdated {
                        text_block: update.text_block,
                        user_id: update.user_id,
                        slide_index: Some(update.slide_index),
                    },
                    None,
                );
            }
            HubRequest::DeleteTextBlock(delete) => {
                if let Some(room) = self.rooms.get_mut(&delete.presentation_id) {
                    for slide in &mut room.slides {
                        slide.content.retain(|b| b.id != delete.text_block_id);
                    }
                }
                self.broadcast(
                    &delete.presentation_id,
                    &HubEvent::TextBlockDeleted {
                        text_block_id: delete.text_block_id,
                        user_id: delete.user_id,
                        slide_index: Some(delete.slide_index),
                    },
                    None,
                );
            }
            HubRequest::ChangeUserRole(change) => {
                let Some(room) = self.rooms.get_mut(&change.presentation_id) else {
                    return;
                };
                let authorized = change.requester_id != change.user_id
                    && room
                        .users
                        .iter()
                        .any(|u| u.id == change.requester_id && u.role.can_manage_users());
                if !authorized {
                    log::warn!("Loopback hub: rejected role change by {}", change.requester_id);
                    return;
                }
                let Some(user) = room.users.iter_mut().find(|u| u.id == change.user_id) else {
                    return;
                };
                user.role = change.new_role;
                self.broadcast(
                    &change.presentation_id,
                    &HubEvent::UserRoleChanged {
                        user_id: change.user_id,
                        role: change.new_role,
                    },
                    None,
                );
            }
            HubRequest::SyncState(sync) => {
                let Some(room) = self.rooms.get(&sync.presentation_id) else {
                    return;
                };
                let snapshot = HubEvent::PresentationUpdated(PresentationState {
                    presentation: Some(room.presentation.clone()),
                    slides: Some(room.slides.clone()),
                    users: Some(room.users.clone()),
                });
                self.reply(connection, &snapshot);
            }
        }
    }
}

/// Shared handle to an in-process hub.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    /// A hub that accepts connections.
    pub fn new() -> Self {
        let hub = Self::default();
        hub.lock().online = true;
        hub
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector { hub: self.clone() }
    }

    /// Create (or replace) a hosted presentation.
    pub fn host_presentation(&self, presentation: Presentation, slides: Vec<Slide>, users: Vec<User>) {
        self.lock().rooms.insert(
            presentation.id.clone(),
            Room {
                presentation,
                slides,
                users,
            },
        );
    }

    pub fn slides(&self, presentation_id: &str) -> Option<Vec<Slide>> {
        self.lock().rooms.get(presentation_id).map(|room| room.slides.clone())
    }

    pub fn users(&self, presentation_id: &str) -> Option<Vec<User>> {
        self.lock().rooms.get(presentation_id).map(|room| room.users.clone())
    }

    /// Modify a hosted presentation out of band (as another server-side
    /// actor would) without notifying anyone.
    pub fn edit_room(&self, presentation_id: &str, edit: impl FnOnce(&mut Vec<Slide>, &mut Vec<User>)) -> bool {
        let mut state = self.lock();
        match state.rooms.get_mut(presentation_id) {
            Some(room) => {
                edit(&mut room.slides, &mut room.users);
                true
            }
            None => false,
        }
    }

    /// Push an event to every member of a presentation.
    pub fn broadcast(&self, presentation_id: &str, event: &HubEvent) {
        self.lock().broadcast(presentation_id, event, None);
    }

    /// Toggle availability. Going offline drops every live link.
    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        state.online = online;
        if !online {
            for (_, member) in state.connections.drain() {
                let _ = member.tx.send(LinkEvent::Closed(Some("hub offline".into())));
            }
        }
    }

    /// Drop every live link without going offline.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        for (_, member) in state.connections.drain() {
            let _ = member.tx.send(LinkEvent::Closed(Some("connection reset".into())));
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Every request the hub has handled, in arrival order.
    pub fn received(&self) -> Vec<HubRequest> {
        self.lock().received.clone()
    }

    pub fn clear_received(&self) {
        self.lock().received.clear();
    }
}

/// [`Connector`] for a [`LoopbackHub`]; the URL is ignored.
#[derive(Clone)]
pub struct LoopbackConnector {
    hub: LoopbackHub,
}

impl Connector for LoopbackConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<HubLink, TransportError>> {
        let result = {
            let mut state = self.hub.lock();
            state.connect_attempts += 1;
            if state.online {
                state.next_connection += 1;
                let connection = state.next_connection;
                let (tx, rx) = mpsc::unbounded_channel();
                state.connections.insert(
                    connection,
                    Member {
                        tx,
                        presentation_id: None,
                        user_id: None,
                    },
                );
                Ok(HubLink {
                    outbound: Box::new(LoopbackSink {
                        hub: self.hub.clone(),
                        connection,
                    }),
                    inbound: rx,
                })
            } else {
                Err(TransportError::Refused("hub offline".into()))
            }
        };
        async move { result }.boxed()
    }
}

struct LoopbackSink {
    hub: LoopbackHub,
    connection: u64,
}

impl FrameSink for LoopbackSink {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        let result = {
            let mut state = self.hub.lock();
            if !state.online || !state.connections.contains_key(&self.connection) {
                Err(TransportError::Closed)
            } else {
                match HubRequest::decode(&frame) {
                    Ok(request) => {
                        state.handle(self.connection, request);
                        Ok(())
                    }
                    Err(e) => {
                        log::warn!("Loopback hub: dropping malformed frame: {e}");
                        Ok(())
                    }
                }
            }
        };
        async move { result }.boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.hub.lock().disconnect(self.connection);
        async {}.boxed()
    }
}
