//! # deck-collab — Real-time sync core for collaborative slide editing
//!
//! Keeps every participant's slides consistent through a central hub,
//! with optimistic local edits, echo suppression and offline buffering.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON frames    ┌─────────────┐
//! │ CollabClient │ ◄──────────────► │  Hub        │
//! │ (per user)   │   WebSocket      │ (authority) │
//! └──────┬───────┘                  └─────────────┘
//!        │
//!        ├── ConnectionManager  (backoff, rejoin, resync)
//!        ├── PendingUpdates     (echo suppression window)
//!        ├── OfflineQueue       (bounded FIFO replay)
//!        ├── Reconciler         (remote → local, deferral, LWW)
//!        └── Session            (roster, permissions, DocumentStore)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Hub requests and events (`{"method"|"event", "data"}`)
//! - [`transport`] — Link abstraction and the WebSocket connector
//! - [`connection`] — Connection state machine with exponential backoff
//! - [`pending`] — Recently sent element ids
//! - [`offline`] — Operations buffered while disconnected
//! - [`reconcile`] — Applies remote events to the local document
//! - [`session`] — Local user, presentation, roster and focus
//! - [`client`] — The single-task actor that ties everything together
//! - [`rest`] — REST endpoints used next to the hub
//! - [`loopback`] — In-process hub for tests and demos

pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod loopback;
pub mod offline;
pub mod pending;
pub mod protocol;
pub mod reconcile;
pub mod rest;
pub mod session;
pub mod timers;
pub mod transport;

// Re-exports for convenience
pub use client::{CollabClient, Command, SendOutcome};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Retry};
pub use events::{EventSink, NotificationKind, UiEvent};
pub use loopback::{LoopbackConnector, LoopbackHub};
pub use offline::{OfflineQueue, OperationKind, QueuedOp, QueuedOperation};
pub use pending::PendingUpdates;
pub use protocol::{
    HubEvent, HubRequest, PresentationState, ProtocolError, RoleChangeRequest, SessionMembership,
    TextBlockDelete, TextBlockUpdate,
};
pub use reconcile::{ApplyOutcome, DeferredUpdate, Reconciler, RemoteUpdate};
pub use rest::{JoinedPresentation, RestClient, RestError};
pub use session::{LocalChange, LocalUser, Session, StylePatch};
pub use transport::{Connector, FrameSink, HubLink, LinkEvent, TransportError, WsConnector};
