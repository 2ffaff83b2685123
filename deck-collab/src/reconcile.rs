//! Remote-update reconciler.
//!
//! Applies hub events to the local session:
//!
//! ```text
//!  TextBlockUpdated ─► pending? ──yes──► drop (own echo)
//!                        │no
//!                        ▼
//!                   exists locally? ──no──► create
//!                        │yes
//!                        ▼
//!                   being edited? ──yes──► defer (latest wins) + conflict mark
//!                        │no
//!                        ▼
//!                   replace whole block + remote indicator
//! ```
//!
//! Deletes are never echo-suppressed and are idempotent. Bulk replacements
//! (slide content, full resync) keep the local version of the block under
//! edit and of blocks with pending echoes.

use std::collections::{HashMap, HashSet};

use deck_core::{Role, Slide, TextBlock, User};
use tokio::time::Instant;

use crate::events::{EventSink, NotificationKind, UiEvent};
use crate::pending::PendingUpdates;
use crate::protocol::PresentationState;
use crate::session::Session;

/// Result of applying a remote text block update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Own echo; nothing changed
    EchoIgnored,
    Created,
    Updated,
    /// Held until local editing of the element ends
    Deferred,
    /// Malformed or targeting a slide that does not exist
    Ignored,
}

/// An inbound `TextBlockUpdated`, as handed to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub block: TextBlock,
    pub user_id: String,
    /// Used only when the block does not exist locally; defaults to the
    /// current slide
    pub slide_index: Option<usize>,
}

/// A remote update held back while the element is being edited locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredUpdate {
    pub block: TextBlock,
    pub user_id: String,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    deferred: HashMap<String, DeferredUpdate>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred(&self, id: &str) -> Option<&DeferredUpdate> {
        self.deferred.get(id)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn clear(&mut self) {
        self.deferred.clear();
    }

    // ─── Text blocks ───────────────────────────────────────────────

    /// Apply a remote `TextBlockUpdated`.
    pub fn apply_remote_update(
        &mut self,
        session: &mut Session,
        pending: &PendingUpdates,
        events: &EventSink,
        update: RemoteUpdate,
        now: Instant,
    ) -> ApplyOutcome {
        let RemoteUpdate {
            block: incoming,
            user_id,
            slide_index,
        } = update;
        if incoming.id.is_empty() {
            log::warn!("Ignoring remote update without an element id");
            return ApplyOutcome::Ignored;
        }
        if pending.is_pending(&incoming.id, now) {
            log::debug!("Ignoring echo of local update to {}", incoming.id);
            return ApplyOutcome::EchoIgnored;
        }
        if session.is_editing(&incoming.id) {
            if let Some(handle) = session.store.handle(&incoming.id) {
                log::debug!("Deferring remote update to {} while it is being edited", incoming.id);
                events.emit(UiEvent::ConflictMarked {
                    handle,
                    user_id: user_id.clone(),
                });
                self.deferred.insert(incoming.id.clone(), DeferredUpdate { block: incoming, user_id });
                return ApplyOutcome::Deferred;
            }
        }
        Self::overwrite(session, events, incoming, &user_id, slide_index)
    }

    /// Replace (or create) the block unconditionally.
    fn overwrite(
        session: &mut Session,
        events: &EventSink,
        incoming: TextBlock,
        user_id: &str,
        slide_index: Option<usize>,
    ) -> ApplyOutcome {
        let existing = session.store.find_text_block(&incoming.id).map(|(index, _)| index);
        match existing {
            Some(index) => {
                let id = incoming.id.clone();
                let Some(upsert) = session.store.update_text_block_in_slide(index, &id, incoming.clone()) else {
                    return ApplyOutcome::Ignored;
                };
                let handle = upsert.handle();
                events.emit(UiEvent::ElementUpdated {
                    slide_index: index,
                    handle,
                    block: incoming,
                });
                events.emit(UiEvent::RemoteUpdateIndicator {
                    handle,
                    user_id: user_id.to_string(),
                });
                ApplyOutcome::Updated
            }
            None => {
                let index = slide_index.unwrap_or_else(|| session.store.current_slide_index());
                let Some(handle) = session.store.add_text_block_to_slide(index, incoming.clone()) else {
                    log::warn!("Remote block {} targets missing slide {}", incoming.id, index);
                    return ApplyOutcome::Ignored;
                };
                events.emit(UiEvent::ElementCreated {
                    slide_index: index,
                    handle,
                    block: incoming,
                });
                ApplyOutcome::Created
            }
        }
    }

    /// Apply a remote `TextBlockDeleted`. Deleting an absent block is a
    /// no-op returning `false`.
    pub fn apply_remote_delete(&mut self, session: &mut Session, events: &EventSink, id: &str) -> bool {
        if let Some(_dropped) = self.deferred.remove(id) {
            if let Some(handle) = session.store.handle(id) {
                events.emit(UiEvent::ConflictCleared { handle });
            }
        }
        let Some((slide_index, _)) = session.store.find_text_block(id) else {
            return false;
        };
        let Some((_, handle)) = session.store.remove_text_block_from_slide(slide_index, id) else {
            return false;
        };
        if session.forget_element(id) {
            events.emit(UiEvent::SelectionChanged { selected: None });
        }
        events.emit(UiEvent::ElementRemoved {
            slide_index,
            handle,
            id: id.to_string(),
        });
        true
    }

    /// Local editing of `id` ended: apply the deferred update, if any,
    /// exactly once.
    pub fn on_edit_end(&mut self, session: &mut Session, events: &EventSink, id: &str) -> Option<ApplyOutcome> {
        let deferred = self.deferred.remove(id)?;
        if let Some(handle) = session.store.handle(id) {
            events.emit(UiEvent::ConflictCleared { handle });
        }
        Some(Self::overwrite(session, events, deferred.block, &deferred.user_id, None))
    }

    /// The local user lost edit rights: drop edit focus and apply the
    /// update deferred for the focused block, if any.
    fn end_edit_on_demotion(&mut self, session: &mut Session, events: &EventSink) {
        if let Some(id) = session.end_edit() {
            log::debug!("Edit of {id} ended by role change");
            self.on_edit_end(session, events, &id);
        }
    }

    /// Drop the deferred update for an element removed locally.
    pub fn forget(&mut self, id: &str) {
        self.deferred.remove(id);
    }

    // ─── Roster ────────────────────────────────────────────────────

    /// Returns `false` for users not in the roster.
    pub fn apply_role_change(&mut self, session: &mut Session, events: &EventSink, user_id: &str, role: Role) -> bool {
        if !session.set_role(user_id, role) {
            log::debug!("Role change for unknown user {user_id}");
            return false;
        }
        events.emit(UiEvent::RosterChanged {
            users: session.roster().to_vec(),
        });
        if session.is_local_user(user_id) {
            log::info!("Local role is now {role}");
            if !role.can_edit() {
                self.end_edit_on_demotion(session, events);
            }
            events.emit(UiEvent::PermissionsChanged(session.permissions()));
            events.notify(NotificationKind::Info, format!("Your role is now {role}"));
        }
        true
    }

    pub fn user_joined(&mut self, session: &mut Session, events: &EventSink, user: User) {
        let nickname = user.nickname.clone();
        let is_local = session.is_local_user(&user.id);
        if session.upsert_user(user) && !is_local {
            events.notify(NotificationKind::Info, format!("{nickname} joined"));
        }
        events.emit(UiEvent::RosterChanged {
            users: session.roster().to_vec(),
        });
        if is_local {
            events.emit(UiEvent::PermissionsChanged(session.permissions()));
        }
    }

    pub fn user_left(&mut self, session: &mut Session, events: &EventSink, user_id: &str) {
        if let Some(user) = session.remove_user(user_id) {
            events.notify(NotificationKind::Info, format!("{} left", user.nickname));
            events.emit(UiEvent::RosterChanged {
                users: session.roster().to_vec(),
            });
        }
    }

    // ─── Slides ────────────────────────────────────────────────────

    pub fn slide_changed(&mut self, session: &mut Session, events: &EventSink, index: usize) -> bool {
        if !session.store.set_current_slide_index(index) {
            return false;
        }
        events.emit(UiEvent::SlideLoaded { index });
        true
    }

    pub fn slide_added(&mut self, session: &mut Session, events: &EventSink, slide: Slide) {
        session.store.add_slide(slide);
        events.emit(UiEvent::SlidesChanged {
            count: session.store.slide_count(),
        });
    }

    pub fn slide_removed(&mut self, session: &mut Session, events: &EventSink, index: usize) -> bool {
        let Some(slide) = session.store.remove_slide(index) else {
            return false;
        };
        let mut selection_changed = false;
        for block in &slide.content {
            self.deferred.remove(&block.id);
            selection_changed |= session.forget_element(&block.id);
        }
        if selection_changed {
            events.emit(UiEvent::SelectionChanged { selected: None });
        }
        events.emit(UiEvent::SlidesChanged {
            count: session.store.slide_count(),
        });
        events.emit(UiEvent::SlideLoaded {
            index: session.store.current_slide_index(),
        });
        true
    }

    /// Replace one slide's content (`SlideContentUpdated`).
    pub fn replace_slide_content(
        &mut self,
        session: &mut Session,
        pending: &PendingUpdates,
        events: &EventSink,
        index: usize,
        content: Vec<TextBlock>,
        now: Instant,
    ) -> bool {
        let Some(local) = session.store.slide(index) else {
            return false;
        };
        let (merged, deferred) = self.preserve_local(session, pending, &local.content.clone(), content, now);
        session.store.replace_slide_content(index, merged);
        self.after_bulk_replace(session, events, deferred);
        if index == session.store.current_slide_index() {
            events.emit(UiEvent::SlideLoaded { index });
        }
        true
    }

    /// Apply a full or partial `PresentationUpdated` snapshot.
    pub fn apply_presentation_state(
        &mut self,
        session: &mut Session,
        pending: &PendingUpdates,
        events: &EventSink,
        state: PresentationState,
        now: Instant,
    ) {
        if let Some(presentation) = state.presentation {
            session.set_presentation(presentation);
        }
        if let Some(users) = state.users {
            session.replace_roster(users);
            if session.role().is_some_and(|r| !r.can_edit()) {
                self.end_edit_on_demotion(session, events);
            }
            events.emit(UiEvent::RosterChanged {
                users: session.roster().to_vec(),
            });
            events.emit(UiEvent::PermissionsChanged(session.permissions()));
        }
        if let Some(slides) = state.slides {
            let local: Vec<Slide> = session.store.slides().to_vec();
            let mut all_deferred = Vec::new();
            let mut merged_slides = Vec::with_capacity(slides.len());
            for (index, mut slide) in slides.into_iter().enumerate() {
                let local_content = local.get(index).map(|s| s.content.clone()).unwrap_or_default();
                let incoming = std::mem::take(&mut slide.content);
                let (merged, deferred) = self.preserve_local(session, pending, &local_content, incoming, now);
                slide.content = merged;
                all_deferred.extend(deferred);
                merged_slides.push(slide);
            }
            session.store.replace_slides(merged_slides);

            let mut selection_changed = false;
            for id in [session.selected().map(str::to_string), session.editing().map(str::to_string)]
                .into_iter()
                .flatten()
            {
                if session.store.find_text_block(&id).is_none() {
                    selection_changed |= session.forget_element(&id);
                    self.deferred.remove(&id);
                }
            }
            if selection_changed {
                events.emit(UiEvent::SelectionChanged { selected: None });
            }
            self.after_bulk_replace(session, events, all_deferred);
            events.emit(UiEvent::SlidesChanged {
                count: session.store.slide_count(),
            });
            events.emit(UiEvent::SlideLoaded {
                index: session.store.current_slide_index(),
            });
        }
    }

    /// Merge incoming slide content with the local one. The block under
    /// edit and blocks with live pending marks keep their local version;
    /// the incoming version of the edited block is deferred.
    fn preserve_local(
        &mut self,
        session: &Session,
        pending: &PendingUpdates,
        local: &[TextBlock],
        incoming: Vec<TextBlock>,
        now: Instant,
    ) -> (Vec<TextBlock>, Vec<String>) {
        let protected = |id: &str| session.is_editing(id) || pending.is_pending(id, now);
        let local_by_id: HashMap<&str, &TextBlock> = local.iter().map(|b| (b.id.as_str(), b)).collect();

        let mut deferred = Vec::new();
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(incoming.len());
        for block in incoming {
            if !seen.insert(block.id.clone()) {
                continue;
            }
            match local_by_id.get(block.id.as_str()) {
                Some(local_block) if protected(&block.id) => {
                    if session.is_editing(&block.id) && **local_block != block {
                        deferred.push(block.id.clone());
                        self.deferred.insert(
                            block.id.clone(),
                            DeferredUpdate {
                                block,
                                user_id: String::new(),
                            },
                        );
                    }
                    merged.push((*local_block).clone());
                }
                _ => merged.push(block),
            }
        }
        for block in local {
            if protected(&block.id) && !seen.contains(&block.id) {
                merged.push(block.clone());
            }
        }
        (merged, deferred)
    }

    fn after_bulk_replace(&self, session: &Session, events: &EventSink, deferred: Vec<String>) {
        for id in deferred {
            if let Some(handle) = session.store.handle(&id) {
                events.emit(UiEvent::ConflictMarked {
                    handle,
                    user_id: String::new(),
                });
            }
        }
    }
}
