//! # inkwell-collab — real-time document sync server
//!
//! Editors connect over WebSocket, join a session per document key, and
//! exchange text operations, cursors and presence. Each session keeps an
//! operation log with periodic snapshots so late joiners can catch up.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    JSON frames     ┌──────────────┐
//! │ CollabClient │ ◄────────────────► │  SyncServer  │
//! │ (per editor) │                    │  dispatch    │
//! └──────────────┘                    └──────┬───────┘
//!                                            │ key
//!                                     ┌──────┴───────┐
//!                                     │ SessionRouter│
//!                                     └──────┬───────┘
//!                                            │
//!                         ┌──────────────────┼──────────────────┐
//!                         ▼                  ▼                  ▼
//!                   Session task       Session task       Session task
//!                   OperationLog       OperationLog       OperationLog
//!                   PresenceRegistry   PresenceRegistry   PresenceRegistry
//!                   BroadcastGroup     BroadcastGroup     BroadcastGroup
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages
//! - [`oplog`] — operation log, compaction, catch-up
//! - [`presence`] — participants, cursors, colours
//! - [`broadcast`] — bounded fan-out with slow-consumer detection
//! - [`session`] — per-document actor
//! - [`router`] — key → session map
//! - [`content`] — initial document content
//! - [`config_hub`] — branch configuration broadcast
//! - [`dispatch`] — upgrade request routing
//! - [`server`] — WebSocket server
//! - [`client`] — WebSocket client

pub mod broadcast;
pub mod client;
pub mod config_hub;
pub mod content;
pub mod dispatch;
pub mod oplog;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::{branch_config_url, document_url, ClientError, ClientEvent, CollabClient};
pub use config_hub::{ConfigHub, ConfigSubscription};
pub use content::{ContentError, ContentStore, DirectoryContentStore, MemoryContentStore};
pub use dispatch::{DispatchError, JoinParams, Route};
pub use oplog::{CatchUp, OpLogError, OpLogStats, OperationLog, DEFAULT_COMPACTION_THRESHOLD};
pub use presence::{Participant, PresenceRegistry};
pub use protocol::{
    ClientMessage, Cursor, Frame, ParticipantId, ProtocolError, ServerMessage, UserIdentity,
};
pub use router::SessionRouter;
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use session::{SessionError, SessionHandle, SessionSettings, SessionSnapshot};

pub use inkwell_ot::{Component, OperationError, TextOperation};
