//! Per-room broadcast actor.
//!
//! One sequential task owns each active room: its client set, its history
//! calls, and the fan-out of every envelope. All interaction goes through
//! the room's mailbox, so joins, leaves, and broadcasts for one room are
//! applied in strict submission order and no lock ever guards the client
//! set. Across rooms, actors run independently.
//!
//! Fan-out delivers to every client except the sender, through bounded
//! per-client mailboxes. A full mailbox blocks the actor until the slow
//! client drains: one stalled client stalls the whole room. That is the
//! backpressure contract.
//!
//! Reference: Kleppmann — DDIA, Chapter 8 (Total Order Broadcast)

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Envelope, ParticipantId, RoomId};
use crate::storage::{HistoryStore, StoreError};

/// Pending envelopes a client's session may buffer before broadcasts to its
/// room start blocking. A behavioral contract, not a tuning knob.
pub const MAILBOX_CAPACITY: usize = 32;

/// Identity of one joined connection within its room. Distinct from the
/// participant id: the same participant may hold several connections.
pub type ClientId = u64;

/// What a session receives back from a successful join.
pub struct JoinedClient {
    pub client_id: ClientId,
    /// Envelopes the room queues for this client, capacity [`MAILBOX_CAPACITY`].
    pub mailbox: mpsc::Receiver<Envelope>,
}

enum RoomMsg {
    Join {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<JoinedClient, RoomError>>,
    },
    Leave {
        client: ClientId,
    },
    Broadcast {
        envelope: Envelope,
        sender: Option<ClientId>,
        ack: Option<oneshot::Sender<()>>,
    },
    ClientCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Handle to one room's actor. Cheap to clone; all methods enqueue a
/// message and the actor applies them in submission order.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomMsg>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Register a new client and pull the room's history.
    ///
    /// A non-empty history snapshot is queued to the new client's mailbox
    /// before anything else; no other client sees it. Fails if the history
    /// load fails, in which case no client was registered.
    pub async fn join(&self, participant: ParticipantId) -> Result<JoinedClient, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Join {
                participant,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::Closed)?;
        reply_rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Remove a client. Idempotent; safe to call after the room is gone.
    pub async fn leave(&self, client: ClientId) {
        let _ = self.tx.send(RoomMsg::Leave { client }).await;
    }

    /// Persist an envelope and fan it out to every client except `from`.
    pub async fn post(&self, envelope: Envelope, from: Option<ClientId>) -> Result<(), RoomError> {
        self.tx
            .send(RoomMsg::Broadcast {
                envelope,
                sender: from,
                ack: None,
            })
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Like [`post`](Self::post), but resolves once the envelope has been
    /// sequenced by the room (not necessarily durably persisted). Used by
    /// the roster flow, which must observe its own update ordered before
    /// releasing the room.
    pub async fn post_acked(&self, envelope: Envelope) -> Result<(), RoomError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Broadcast {
                envelope,
                sender: None,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| RoomError::Closed)?;
        ack_rx.await.map_err(|_| RoomError::Closed)
    }

    /// Number of currently joined clients.
    pub async fn client_count(&self) -> Result<usize, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::ClientCount { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Closed)?;
        reply_rx.await.map_err(|_| RoomError::Closed)
    }

    /// True when both handles point at the same actor instance.
    pub fn same_actor(&self, other: &RoomHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Terminate the actor. Only the registry calls this, at refcount zero.
    pub(crate) async fn shutdown(&self) {
        let _ = self.tx.send(RoomMsg::Shutdown).await;
    }
}

/// Spawn a room actor and return its handle.
pub(crate) fn spawn_room(room_id: RoomId, store: Arc<dyn HistoryStore>) -> RoomHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let actor = RoomActor {
        room_id,
        store,
        clients: Vec::new(),
        next_client: 1,
        rx,
    };
    tokio::spawn(actor.run());
    RoomHandle { room_id, tx }
}

/// Actor-side record of one joined client.
struct ClientHandle {
    id: ClientId,
    participant: ParticipantId,
    tx: mpsc::Sender<Envelope>,
}

struct RoomActor {
    room_id: RoomId,
    store: Arc<dyn HistoryStore>,
    clients: Vec<ClientHandle>,
    next_client: ClientId,
    rx: mpsc::Receiver<RoomMsg>,
}

impl RoomActor {
    async fn run(mut self) {
        log::debug!("room {}: actor running", self.room_id);

        while let Some(msg) = self.rx.recv().await {
            match msg {
                RoomMsg::Join { participant, reply } => {
                    let _ = reply.send(self.handle_join(participant).await);
                }
                RoomMsg::Leave { client } => self.handle_leave(client),
                RoomMsg::Broadcast {
                    envelope,
                    sender,
                    ack,
                } => self.handle_broadcast(envelope, sender, ack).await,
                RoomMsg::ClientCount { reply } => {
                    let _ = reply.send(self.clients.len());
                }
                RoomMsg::Shutdown => break,
            }
        }

        log::debug!("room {}: actor stopped", self.room_id);
    }

    async fn handle_join(
        &mut self,
        participant: ParticipantId,
    ) -> Result<JoinedClient, RoomError> {
        // The history call runs inside this turn and blocks the room until
        // it returns; the snapshot can therefore never miss a broadcast
        // sequenced before this join.
        let snapshot = self.store.load_history(self.room_id).map_err(RoomError::History)?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = self.next_client;
        self.next_client += 1;
        self.clients.push(ClientHandle {
            id,
            participant,
            tx: tx.clone(),
        });

        if !snapshot.is_empty() {
            // fresh mailbox, a single envelope always fits
            let _ = tx.send(snapshot.into_envelope()).await;
        }

        log::info!(
            "room {}: participant {participant} joined as client {id} ({} connected)",
            self.room_id,
            self.clients.len()
        );
        Ok(JoinedClient {
            client_id: id,
            mailbox: rx,
        })
    }

    fn handle_leave(&mut self, client: ClientId) {
        if let Some(pos) = self.clients.iter().position(|c| c.id == client) {
            let gone = self.clients.remove(pos);
            log::info!(
                "room {}: participant {} (client {client}) left ({} connected)",
                self.room_id,
                gone.participant,
                self.clients.len()
            );
        }
    }

    async fn handle_broadcast(
        &mut self,
        envelope: Envelope,
        sender: Option<ClientId>,
        ack: Option<oneshot::Sender<()>>,
    ) {
        // Live fan-out continues on a failed history write; only late
        // joiners can miss the update.
        if let Err(e) = self.store.post_history(self.room_id, &envelope) {
            log::error!("room {}: history write failed: {e}", self.room_id);
        }

        // The envelope is sequenced at this point, which is what ack'd
        // callers wait for.
        if let Some(ack) = ack {
            let _ = ack.send(());
        }

        for client in &self.clients {
            if sender == Some(client.id) {
                continue;
            }
            // Blocks while the client's mailbox is full. A closed mailbox
            // means the session is gone; its Leave will prune the handle.
            if client.tx.send(envelope.clone()).await.is_err() {
                log::debug!(
                    "room {}: skipped delivery to departed client {}",
                    self.room_id,
                    client.id
                );
            }
        }
    }
}

/// Room errors.
#[derive(Debug)]
pub enum RoomError {
    /// The room's actor is gone (torn down or never reachable)
    Closed,
    /// The history load on join failed; the join did not happen
    History(StoreError),
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "room closed"),
            Self::History(e) => write!(f, "history load failed: {e}"),
        }
    }
}

impl std::error::Error for RoomError {}
