//! Durable room history behind a narrow collaborator trait.
//!
//! ```text
//! ┌────────────┐  post_history   ┌───────────────┐
//! │ RoomActor  │ ──────────────► │ HistoryStore  │
//! │ (per room) │ ◄────────────── │ (trait)       │
//! └────────────┘  load_history   └───────┬───────┘
//!                                        │
//!                          ┌─────────────┴─────────────┐
//!                          ▼                           ▼
//!                   ┌─────────────┐             ┌─────────────┐
//!                   │ MemoryStore │             │ RoomStore   │
//!                   │ (tests/dev) │             │ (RocksDB)   │
//!                   └─────────────┘             └─────────────┘
//! ```
//!
//! Merge contract, applied per envelope:
//! - points — appended to the participant's existing row
//! - areas  — the participant's area set is replaced wholesale
//! - players — upserted into the room's roster
//! - leaving — ignored; the persisted roster is never shrunk
//!
//! Rows are keyed by (room, participant), so partial application on error
//! cannot corrupt unrelated participants' rows. Rooms unknown to the store
//! load as an empty snapshot; rooms spring into existence on first write.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RoomStore, StoreConfig};

use crate::protocol::{Envelope, HistorySnapshot, RoomId};

/// The persistence collaborator contract.
///
/// Calls run to completion on the caller's thread; each room actor invokes
/// the store within its own turn, so all writes for one room are serialized.
/// Implementations must be safe under concurrent calls from different rooms.
pub trait HistoryStore: Send + Sync {
    /// Load the cumulative state for a room. Unknown rooms yield an empty
    /// snapshot rather than an error.
    fn load_history(&self, room: RoomId) -> Result<HistorySnapshot, StoreError>;

    /// Merge one envelope into the room's durable state.
    fn post_history(&self, room: RoomId, envelope: &Envelope) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend failure (I/O, corruption, lock contention)
    Database(String),
    /// Row value could not be serialized
    Serialization(String),
    /// Row value could not be deserialized
    Deserialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "database error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
