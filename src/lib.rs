//! # docmesh — real-time collaborative text editing
//!
//! Multiple clients edit the same document over WebSocket connections; the
//! server reconciles concurrent edits into one linear history using
//! operational transformation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket    ┌─────────────────────────────┐
//! │ CollabClient │ ◄────────────► │ session (read / write loop) │
//! │  (per user)  │   JSON frames  └──────────────┬──────────────┘
//! └──────────────┘                               │ channels
//!                                                ▼
//!                                 ┌─────────────────────────────┐
//!                                 │ hub loop (one per document) │
//!                                 │   transform → apply → log   │
//!                                 └──────────────┬──────────────┘
//!                                                │ fan-out (N-1)
//!                                 ┌──────────────┴──────────────┐
//!                                 │ bounded per-client queues   │
//!                                 └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire envelope, operations, deltas, cursors
//! - [`transform`] — pure OT transform and delta rebase
//! - [`document`] — authoritative content, version, delta log
//! - [`hub`] — per-document actor: serial apply loop and fan-out
//! - [`session`] — per-connection read/write loops with keepalive
//! - [`registry`] — process-wide document-id → hub map
//! - [`api`] — HTTP surface: create/lookup/health + WebSocket upgrade
//! - [`server`] — configuration and the bind/serve entry point
//! - [`client`] — WebSocket client used by apps and integration tests

pub mod api;
pub mod client;
pub mod document;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transform;

// Re-exports for convenience
pub use client::{ClientEvent, CollabClient, ConnectionState};
pub use document::{ApplyError, Document};
pub use hub::{ClientHandle, Hub, HubHandle};
pub use protocol::{
    Cursor, Delta, DocumentInfo, Envelope, MessageKind, Operation, ProtocolError,
};
pub use registry::HubRegistry;
pub use server::{CollabServer, ServerConfig};
pub use session::SessionConfig;
pub use transform::{rebase, transform};
