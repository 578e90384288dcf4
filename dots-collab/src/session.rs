//! Per-connection duplex loop between a WebSocket and a room actor.
//!
//! ```text
//!            frames                envelopes
//! WebSocket ────────► reader task ───────────┐
//!                                            ▼
//!                                       main loop ──► RoomHandle::post
//!                                        │    ▲
//!                      keepalive (30s) ──┘    └── client mailbox
//!            frames                                 (room fan-out)
//! WebSocket ◄───────────────────────────────┘
//! ```
//!
//! The reader decodes inbound frames and stamps them with the session's
//! authenticated participant id; malformed frames are dropped, not fatal.
//! The main loop multiplexes inbound envelopes, the room's fan-out, and an
//! idle keepalive. No matter what ends the session (peer close, transport
//! error, room teardown), the room reference taken at the start is dropped
//! on the way out, exactly once.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::protocol::{Envelope, ParticipantId, ProtocolError, RoomId};
use crate::registry::{RegistryError, RoomRegistry};
use crate::room::{ClientId, RoomError, RoomHandle};

/// Idle interval after which a payload-empty keepalive envelope is written.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Drive one connection against its room until the connection ends.
///
/// `room_id` and `participant` come from the external auth/routing layer
/// and are trusted as authenticated. The room reference is released on
/// every exit path; when this session held the last reference, the room
/// actor is torn down behind it.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    registry: &RoomRegistry,
    room_id: RoomId,
    participant: ParticipantId,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let room = registry.acquire(room_id).await?;
    let outcome = serve(&room, ws, participant).await;
    registry.release(room_id).await;
    outcome
}

async fn serve<S>(
    room: &RoomHandle,
    ws: WebSocketStream<S>,
    participant: ParticipantId,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let joined = room.join(participant).await?;
    let client_id = joined.client_id;
    let outcome = pump(room, joined.mailbox, ws, client_id, participant).await;
    room.leave(client_id).await;
    outcome
}

async fn pump<S>(
    room: &RoomHandle,
    mut mailbox: mpsc::Receiver<Envelope>,
    ws: WebSocketStream<S>,
    client_id: ClientId,
    participant: ParticipantId,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, stream) = ws.split();

    // The reader hands decoded envelopes over one at a time; dropping its
    // sender signals end-of-stream to the select below.
    let (in_tx, mut in_rx) = mpsc::channel::<Envelope>(1);
    let reader = tokio::spawn(read_frames(stream, participant, in_tx));

    let result = drive(room, &mut mailbox, &mut in_rx, &mut sink, client_id).await;

    // The reader may still be parked on a dead socket; nothing useful can
    // come out of it once the session is over.
    reader.abort();
    result
}

async fn drive<S>(
    room: &RoomHandle,
    mailbox: &mut mpsc::Receiver<Envelope>,
    in_rx: &mut mpsc::Receiver<Envelope>,
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    client_id: ClientId,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        // a fresh sleep every turn: any traffic resets the idle clock
        tokio::select! {
            inbound = in_rx.recv() => match inbound {
                Some(envelope) => room.post(envelope, Some(client_id)).await?,
                // reader saw end-of-stream or a transport error
                None => return Ok(()),
            },
            outbound = mailbox.recv() => match outbound {
                Some(envelope) => {
                    sink.send(Message::text(envelope.encode()?)).await?;
                }
                // room torn down under us
                None => return Ok(()),
            },
            _ = sleep(KEEPALIVE_INTERVAL) => {
                sink.send(Message::text(Envelope::keepalive().encode()?)).await?;
            }
        }
    }
}

/// Decode inbound frames until the transport ends.
///
/// Malformed frames are logged and skipped; the session keeps running.
/// Whatever sender id a frame claims is replaced with the session's
/// authenticated participant id before the envelope reaches the room.
async fn read_frames<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    participant: ParticipantId,
    out: mpsc::Sender<Envelope>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match Envelope::decode(text.as_str()) {
                Ok(mut envelope) => {
                    envelope.sender = participant;
                    if out.send(envelope).await.is_err() {
                        return;
                    }
                }
                Err(e) => log::warn!("dropping malformed frame: {e}"),
            },
            Ok(Message::Close(_)) => return,
            // binary and control frames are not part of this protocol
            Ok(_) => {}
            Err(e) => {
                log::debug!("transport read error: {e}");
                return;
            }
        }
    }
}

/// Session errors. All of them are fatal to this session only.
#[derive(Debug)]
pub enum SessionError {
    Registry(RegistryError),
    Room(RoomError),
    Transport(tokio_tungstenite::tungstenite::Error),
    Protocol(ProtocolError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Room(e) => write!(f, "room: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RegistryError> for SessionError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<RoomError> for SessionError {
    fn from(e: RoomError) -> Self {
        Self::Room(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
