//! Synchronous roster registration for the invitation flow.
//!
//! An invitation handler must have the invited participant in the room's
//! player roster before it redirects the browser into the room; otherwise
//! the page loads a roster without its own player. This is the one caller
//! of a room actor outside a client session: it takes a room reference,
//! posts an acknowledged roster upsert, and releases the reference once
//! the update is sequenced.

use crate::protocol::{color_scheme_for, ColorScheme, Envelope, ParticipantId, RoomId};
use crate::registry::RoomRegistry;
use crate::room::RoomError;

/// Register a participant in a room's player roster and wait until the
/// roster update has been sequenced by the room.
///
/// Connected clients see the update as a regular broadcast; it also lands
/// in the persisted history, so the participant is on the roster when
/// their own session joins moments later. With no `scheme` given, a stable
/// one is derived from the participant id.
pub async fn register_participant(
    registry: &RoomRegistry,
    room_id: RoomId,
    participant: ParticipantId,
    scheme: Option<ColorScheme>,
) -> Result<ColorScheme, RoomError> {
    let scheme = scheme.unwrap_or_else(|| color_scheme_for(participant));

    let room = registry.acquire(room_id).await?;
    let result = room
        .post_acked(Envelope::roster_entry(participant, scheme.clone()))
        .await;
    registry.release(room_id).await;

    if result.is_ok() {
        log::info!("room {room_id}: registered participant {participant} on the roster");
    }
    result.map(|()| scheme)
}
