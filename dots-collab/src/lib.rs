//! # dots-collab — multiplayer board server
//!
//! Real-time fan-out of collaborative board edits (points and captured
//! areas) among everyone connected to a shared room, with the cumulative
//! state persisted so late joiners see prior work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  acquire/release  ┌──────────────┐
//! │ ClientSession│ ◄───────────────► │ RoomRegistry │  (one task,
//! │ (per socket) │                   │ refcounted   │   owns the map)
//! └──────┬───────┘                   └──────┬───────┘
//!        │ join / post                      │ creates / tears down
//!        ▼                                  ▼
//! ┌──────────────┐    fan-out (N−1)  ┌──────────────┐
//! │ client       │ ◄──────────────── │ RoomActor    │  (one task per
//! │ mailbox (32) │                   │              │   active room)
//! └──────────────┘                   └──────┬───────┘
//!                                           │ load / post history
//!                                           ▼
//!                                    ┌──────────────┐
//!                                    │ HistoryStore │  (memory or RocksDB)
//!                                    └──────────────┘
//! ```
//!
//! Every room is a sequential actor: joins, leaves, and broadcasts are
//! applied in submission order, per room, with no shared mutable state.
//! The registry is a second sequential actor owning room lifecycles, so
//! reference counting never races creation or teardown.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire envelopes and the room data model
//! - [`registry`] — lazy creation and refcounted teardown of room actors
//! - [`room`] — per-room ordering, fan-out, and history calls
//! - [`session`] — the per-connection duplex loop
//! - [`roster`] — synchronous roster registration for invitation handlers
//! - [`server`] — accept loop and handshake identity extraction
//! - [`storage`] — the persistence collaborator trait and its backends

pub mod protocol;
pub mod registry;
pub mod room;
pub mod roster;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use protocol::{
    color_scheme_for, ColorScheme, Envelope, HistorySnapshot, ParticipantId, Point, Polygon,
    ProtocolError, RoomId, FLAG_KEEPALIVE,
};
pub use registry::{RegistryError, RoomRegistry};
pub use room::{ClientId, JoinedClient, RoomError, RoomHandle, MAILBOX_CAPACITY};
pub use roster::register_participant;
pub use server::{CollabServer, ServerConfig};
pub use session::{run_session, SessionError, KEEPALIVE_INTERVAL};
pub use storage::{HistoryStore, MemoryStore, RoomStore, StoreConfig, StoreError};
