//! Notifications from the sync core to the UI layer.
//!
//! Elements are identified by the [`ElementHandle`] the store allocated
//! when they were created; the UI keys its widgets on handles and never
//! looks elements up by string id.

use deck_core::{ElementHandle, Permissions, TextBlock, User};
use tokio::sync::mpsc;

use crate::connection::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted by the collaboration client.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ElementCreated {
        slide_index: usize,
        handle: ElementHandle,
        block: TextBlock,
    },
    ElementUpdated {
        slide_index: usize,
        handle: ElementHandle,
        block: TextBlock,
    },
    ElementRemoved {
        slide_index: usize,
        handle: ElementHandle,
        id: String,
    },
    /// Transient highlight after a remote user changed an element
    RemoteUpdateIndicator {
        handle: ElementHandle,
        user_id: String,
    },
    /// A remote update is waiting for local editing to end
    ConflictMarked {
        handle: ElementHandle,
        user_id: String,
    },
    ConflictCleared {
        handle: ElementHandle,
    },
    SelectionChanged {
        selected: Option<ElementHandle>,
    },
    /// The given slide must be re-rendered from the store
    SlideLoaded {
        index: usize,
    },
    SlidesChanged {
        count: usize,
    },
    RosterChanged {
        users: Vec<User>,
    },
    PermissionsChanged(Permissions),
    ConnectionStatusChanged(ConnectionStatus),
    Notification {
        message: String,
        kind: NotificationKind,
    },
}

/// Sending half of the UI channel. Emitting never fails; events are
/// dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, kind: NotificationKind, message: impl Into<String>) {
        self.emit(UiEvent::Notification {
            message: message.into(),
            kind,
        });
    }
}
