//! Reference-counted registry of room actors.
//!
//! The registry is itself a sequential actor: every acquire, release, and
//! peek flows through one task that owns the room map and the reference
//! counts. Existence check and creation happen in the same turn, so two
//! sessions racing into a fresh room can never spawn two actors, and a
//! release racing an acquire can never tear down a room that just gained
//! a user. No atomics, no locks.
//!
//! A room actor exists exactly while its net reference count is positive;
//! the transition to zero removes the entry and terminates the actor.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::RoomId;
use crate::room::{spawn_room, RoomError, RoomHandle, MAILBOX_CAPACITY};
use crate::storage::HistoryStore;

enum RegistryMsg {
    Acquire {
        room: RoomId,
        reply: oneshot::Sender<RoomHandle>,
    },
    Release {
        room: RoomId,
    },
    PeekIncrement {
        room: RoomId,
    },
    PeekDecrement {
        room: RoomId,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

struct RegistryEntry {
    handle: RoomHandle,
    refs: u64,
}

/// Handle to the registry actor. Clone freely; one instance of the actor
/// serves the whole process and is created once at startup.
#[derive(Clone)]
pub struct RoomRegistry {
    tx: mpsc::Sender<RegistryMsg>,
}

impl RoomRegistry {
    /// Start the registry actor. Room actors it creates persist their
    /// history through `store`.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = RegistryActor {
            store,
            rooms: HashMap::new(),
            rx,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Take a reference on a room, creating its actor on first acquisition.
    pub async fn acquire(&self, room: RoomId) -> Result<RoomHandle, RegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryMsg::Acquire {
                room,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistryError::Closed)?;
        reply_rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Drop a reference. At zero the room actor is terminated and the entry
    /// removed; a later acquire builds a fresh actor.
    pub async fn release(&self, room: RoomId) {
        let _ = self.tx.send(RegistryMsg::Release { room }).await;
    }

    /// Bump an existing room's reference count without creating the room.
    /// No-op if the room is not active. For callers that already hold a
    /// handle and need to extend its lifetime across an operation.
    pub async fn peek_increment(&self, room: RoomId) {
        let _ = self.tx.send(RegistryMsg::PeekIncrement { room }).await;
    }

    /// Counterpart of [`peek_increment`](Self::peek_increment); no-op if the
    /// room is not active.
    pub async fn peek_decrement(&self, room: RoomId) {
        let _ = self.tx.send(RegistryMsg::PeekDecrement { room }).await;
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(RegistryMsg::RoomCount { reply: reply_tx })
            .await
            .is_err()
        {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

impl From<RegistryError> for RoomError {
    fn from(_: RegistryError) -> Self {
        RoomError::Closed
    }
}

struct RegistryActor {
    store: Arc<dyn HistoryStore>,
    rooms: HashMap<RoomId, RegistryEntry>,
    rx: mpsc::Receiver<RegistryMsg>,
}

impl RegistryActor {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                RegistryMsg::Acquire { room, reply } => {
                    let handle = self.acquire(room);
                    let _ = reply.send(handle);
                }
                RegistryMsg::Release { room } => {
                    if self.rooms.contains_key(&room) {
                        self.decrement(room);
                    } else {
                        log::warn!("registry: release of inactive room {room}");
                    }
                }
                RegistryMsg::PeekIncrement { room } => {
                    if let Some(entry) = self.rooms.get_mut(&room) {
                        entry.refs += 1;
                    }
                }
                RegistryMsg::PeekDecrement { room } => self.decrement(room),
                RegistryMsg::RoomCount { reply } => {
                    let _ = reply.send(self.rooms.len());
                }
            }
        }
    }

    fn acquire(&mut self, room: RoomId) -> RoomHandle {
        match self.rooms.get_mut(&room) {
            Some(entry) => {
                entry.refs += 1;
                entry.handle.clone()
            }
            None => {
                log::info!("registry: creating room {room}");
                let handle = spawn_room(room, self.store.clone());
                self.rooms.insert(
                    room,
                    RegistryEntry {
                        handle: handle.clone(),
                        refs: 1,
                    },
                );
                handle
            }
        }
    }

    fn decrement(&mut self, room: RoomId) {
        let Some(entry) = self.rooms.get_mut(&room) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = self.rooms.remove(&room) {
                // Never park the registry behind a room whose mailbox is
                // full: the actor drains what it already accepted, then
                // stops. The entry is gone either way, so a later acquire
                // builds a fresh actor.
                tokio::spawn(async move { entry.handle.shutdown().await });
            }
            log::info!("registry: room {room} released, stopping actor");
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The registry actor is gone; only possible during process shutdown
    Closed,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "registry closed"),
        }
    }
}

impl std::error::Error for RegistryError {}
