//! # mapsync-collab: realtime sync and optimistic editing for shared maps
//!
//! Server side: tracks which map each browser session is viewing and pushes
//! "something changed" notifications to every viewer of that map.
//! Client side: keeps optimistic writes visible until the server confirms
//! them, and lets the user retry or cancel failed ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   WebSocket (JSON)   ┌──────────────────┐
//! │ RealtimeClient │ ◄──────────────────► │ SyncServer       │
//! │ (per session)  │  announce / notify   │ (central)        │
//! └───────┬────────┘                      └────────┬─────────┘
//!         │ SyncEvent                              │
//!         ▼                                        ▼
//! ┌────────────────┐                      ┌──────────────────┐
//! │ ConfirmedItems │                      │ SessionRegistry  │
//! └───────┬────────┘                      │ (map, dedup)     │
//!         │        ┌──────────────────┐   └────────┬─────────┘
//!         │        │ ItemEditor       │            │
//!         │        │ PendingOperations│   ┌────────┴─────────┐
//!         │        │ RetryCoordinator │   │BroadcastDispatcher│
//!         │        └────────┬─────────┘   │ (fan-out per map)│
//!         ▼                 ▼             └──────────────────┘
//!      compose() ◄── OverrideStore
//!         │
//!         ▼
//!    ComposedView
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages
//! - [`dedup`]: per-session delivered-item cache
//! - [`session`]: session registry
//! - [`broadcast`]: per-map notification fan-out
//! - [`server`]: WebSocket server and handshake API
//! - [`client`]: reconnecting realtime client
//! - [`pending`], [`retry`], [`editor`]: optimistic writes
//! - [`confirmed`], [`overrides`], [`compositor`]: the rendered view

pub mod protocol;
pub mod dedup;
pub mod session;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod pending;
pub mod retry;
pub mod editor;
pub mod confirmed;
pub mod overrides;
pub mod compositor;

// Re-exports for convenience
pub use protocol::{MapAnnouncement, ProtocolError, ServerMessage};
pub use dedup::DeliveredItems;
pub use session::{ConnectionId, SessionId, SessionRegistry, SessionState, SocketHandle, Viewers};
pub use broadcast::{BroadcastDispatcher, BroadcastStats, Mutation};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use client::{ClientConfig, ConnectionState, RealtimeClient, SyncEvent};
pub use pending::{ItemProcess, PendingOperations, ProcessId, ProcessStatus};
pub use retry::RetryCoordinator;
pub use editor::{EditorConfig, EditorError, ItemEditor, ItemTransport, TransportError, WriteOutcome};
pub use confirmed::{ConfirmedItems, NotificationEffect};
pub use overrides::{OverrideItem, OverrideStore};
pub use compositor::{compose, ComposedView, ViewItem, ViewState};
