//! # deck-core — document model for collaborative slide decks
//!
//! Everything a client needs to hold a presentation in memory, with no I/O:
//!
//! - [`model`] — text blocks, slides, presentations, users and roles
//! - [`sanitize`] — total, idempotent normalization of loose payloads
//! - [`store`] — the local document store with stable element handles
//!
//! ```text
//!   raw JSON ──► sanitize() ──► TextBlock ──► DocumentStore
//!                                               │
//!                                               ├── Slide[0] ── [TextBlock…]
//!                                               ├── Slide[1] ── [TextBlock…]
//!                                               └── handles: id → ElementHandle
//! ```

pub mod model;
pub mod sanitize;
pub mod store;

pub use model::{
    FontStyle, FontWeight, Permissions, Presentation, Role, Slide, TextAlign, TextBlock, User,
};
pub use sanitize::{normalize, sanitize};
pub use store::{DocumentStore, ElementHandle, Upsert};
