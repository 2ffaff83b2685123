//! Session context: who the local user is, which presentation is open,
//! the roster, the document store and the local selection/edit focus.
//!
//! One coordinator owns the [`Session`] and passes it to the reconciler and
//! the local operations. Write permissions are never stored; they are
//! derived from the local user's entry in the roster on every check. The
//! checks are advisory: the hub enforces the real policy.

use deck_core::model::{FontStyle, FontWeight, TextAlign};
use deck_core::{normalize, DocumentStore, ElementHandle, Permissions, Presentation, Role, Slide, TextBlock, User};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds for `TextBlock::timestamp`. Display only.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The authenticated user, read from session storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalUser {
    pub id: String,
    #[serde(default)]
    pub nickname: String,
}

impl LocalUser {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
        }
    }

    /// Parse the stored `{"id": .., "nickname": ..}` record.
    pub fn from_session_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Partial restyle. `None` leaves the field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StylePatch {
    pub font_size: Option<u32>,
    pub font_weight: Option<FontWeight>,
    pub font_style: Option<FontStyle>,
    pub text_align: Option<TextAlign>,
}

impl StylePatch {
    fn apply(self, block: &mut TextBlock) {
        if let Some(size) = self.font_size {
            block.font_size = size;
        }
        if let Some(weight) = self.font_weight {
            block.font_weight = weight;
        }
        if let Some(style) = self.font_style {
            block.font_style = style;
        }
        if let Some(align) = self.text_align {
            block.text_align = align;
        }
    }
}

/// A local mutation that was applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub slide_index: usize,
    pub handle: ElementHandle,
    pub block: TextBlock,
}

#[derive(Debug)]
pub struct Session {
    user: LocalUser,
    presentation: Option<Presentation>,
    roster: Vec<User>,
    pub(crate) store: DocumentStore,
    selected: Option<String>,
    editing: Option<String>,
}

impl Session {
    pub fn new(user: LocalUser) -> Self {
        Self {
            user,
            presentation: None,
            roster: Vec::new(),
            store: DocumentStore::new(),
            selected: None,
            editing: None,
        }
    }

    pub fn open(&mut self, presentation: Presentation, slides: Vec<Slide>, users: Vec<User>) {
        self.presentation = Some(presentation);
        self.roster = users;
        self.store = DocumentStore::with_slides(slides);
        self.selected = None;
        self.editing = None;
    }

    pub fn close(&mut self) {
        self.presentation = None;
        self.roster.clear();
        self.store = DocumentStore::new();
        self.selected = None;
        self.editing = None;
    }

    pub fn is_active(&self) -> bool {
        self.presentation.is_some()
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    pub fn presentation(&self) -> Option<&Presentation> {
        self.presentation.as_ref()
    }

    pub fn presentation_id(&self) -> Option<&str> {
        self.presentation.as_ref().map(|p| p.id.as_str())
    }

    pub(crate) fn set_presentation(&mut self, presentation: Presentation) {
        self.presentation = Some(presentation);
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    // ─── Roster & permissions ──────────────────────────────────────

    pub fn roster(&self) -> &[User] {
        &self.roster
    }

    pub fn role(&self) -> Option<Role> {
        self.roster.iter().find(|u| u.id == self.user.id).map(|u| u.role)
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::for_role(self.role())
    }

    pub fn can_edit(&self) -> bool {
        self.permissions().can_edit
    }

    pub fn can_manage_users(&self) -> bool {
        self.permissions().can_manage_users
    }

    pub fn is_local_user(&self, user_id: &str) -> bool {
        self.user.id == user_id
    }

    /// Add or refresh a participant. Returns `true` if they were new.
    pub(crate) fn upsert_user(&mut self, user: User) -> bool {
        match self.roster.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => {
                *existing = user;
                false
            }
            None => {
                self.roster.push(user);
                true
            }
        }
    }

    pub(crate) fn remove_user(&mut self, user_id: &str) -> Option<User> {
        let pos = self.roster.iter().position(|u| u.id == user_id)?;
        Some(self.roster.remove(pos))
    }

    /// Returns `false` for users not in the roster.
    pub(crate) fn set_role(&mut self, user_id: &str, role: Role) -> bool {
        match self.roster.iter_mut().find(|u| u.id == user_id) {
            Some(user) => {
                user.role = role;
                true
            }
            None => false,
        }
    }

    pub(crate) fn replace_roster(&mut self, users: Vec<User>) {
        self.roster = users;
    }

    // ─── Selection & edit focus ────────────────────────────────────

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn is_editing(&self, id: &str) -> bool {
        self.editing.as_deref() == Some(id)
    }

    /// Select an element (or clear with `None`). Unknown ids are rejected.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.store.find_text_block(id).is_none() => false,
            Some(id) => {
                self.selected = Some(id.to_string());
                true
            }
            None => {
                self.selected = None;
                true
            }
        }
    }

    /// Focus an element for text editing. Requires edit permission.
    pub fn begin_edit(&mut self, id: &str) -> bool {
        if !self.can_edit() || self.store.find_text_block(id).is_none() {
            return false;
        }
        self.editing = Some(id.to_string());
        self.selected = Some(id.to_string());
        true
    }

    /// Drop edit focus, returning the element that had it.
    pub fn end_edit(&mut self) -> Option<String> {
        self.editing.take()
    }

    /// Forget selection and focus for a removed element. Returns whether
    /// the selection changed.
    pub(crate) fn forget_element(&mut self, id: &str) -> bool {
        if self.editing.as_deref() == Some(id) {
            self.editing = None;
        }
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
            return true;
        }
        false
    }

    // ─── Local mutations ───────────────────────────────────────────

    /// Add a block to the current slide and select it.
    pub fn add_text_block(&mut self, block: TextBlock) -> Option<LocalChange> {
        if !self.can_edit() {
            return None;
        }
        let block = normalize(block);
        let slide_index = self.store.current_slide_index();
        let handle = self.store.add_text_block_to_slide(slide_index, block.clone())?;
        self.selected = Some(block.id.clone());
        Some(LocalChange {
            slide_index,
            handle,
            block,
        })
    }

    /// Apply `edit` to a copy of the block, normalize it and store it.
    pub fn modify_text_block(&mut self, id: &str, edit: impl FnOnce(&mut TextBlock)) -> Option<LocalChange> {
        if !self.can_edit() {
            return None;
        }
        let (slide_index, current) = self.store.find_text_block(id)?;
        let mut block = current.clone();
        edit(&mut block);
        block.id = id.to_string();
        block.timestamp = unix_millis();
        let block = normalize(block);
        let handle = self
            .store
            .update_text_block_in_slide(slide_index, id, block.clone())?
            .handle();
        Some(LocalChange {
            slide_index,
            handle,
            block,
        })
    }

    pub fn move_text_block(&mut self, id: &str, x: u32, y: u32) -> Option<LocalChange> {
        self.modify_text_block(id, |b| {
            b.x = x;
            b.y = y;
        })
    }

    pub fn resize_text_block(&mut self, id: &str, width: u32, height: u32) -> Option<LocalChange> {
        self.modify_text_block(id, |b| {
            b.width = width;
            b.height = height;
        })
    }

    pub fn restyle_text_block(&mut self, id: &str, patch: StylePatch) -> Option<LocalChange> {
        self.modify_text_block(id, |b| patch.apply(b))
    }

    pub fn edit_text_content(&mut self, id: &str, content: impl Into<String>) -> Option<LocalChange> {
        let content = content.into();
        self.modify_text_block(id, |b| b.content = content)
    }

    /// Remove a block. Returns the slide it was on and its old handle.
    pub fn delete_text_block(&mut self, id: &str) -> Option<(usize, TextBlock, ElementHandle)> {
        if !self.can_edit() {
            return None;
        }
        let (slide_index, _) = self.store.find_text_block(id)?;
        let (block, handle) = self.store.remove_text_block_from_slide(slide_index, id)?;
        self.forget_element(id);
        Some((slide_index, block, handle))
    }

    pub fn go_to_slide(&mut self, index: usize) -> bool {
        self.store.set_current_slide_index(index)
    }
}
