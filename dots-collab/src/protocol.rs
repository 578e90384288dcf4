//! JSON wire protocol for incremental board updates.
//!
//! One envelope per WebSocket text frame:
//! ```text
//! { "cid": 7,                          sender (authenticated participant)
//!   "fl": 0,                           flags (0x1 = keepalive)
//!   "p":  { "7": [{"x":1,"y":2}] },    new points, keyed by participant
//!   "a":  { "7": [[{"x":0,"y":0},…]] } captured areas, keyed by participant
//!   "pl": { "7": "hsl(210, 70%, 60%)" } roster entries, keyed by participant
//!   "l":  [7] }                        participants leaving the board
//! ```
//! Empty maps and lists are omitted on the wire; `cid` and `fl` are always
//! present. A typical point update is under 60 bytes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Room identifier, assigned by the external routing layer.
pub type RoomId = u64;

/// Authenticated participant identifier.
pub type ParticipantId = u64;

/// A participant's display colors, as a CSS color expression.
pub type ColorScheme = String;

/// Flag bit marking a payload-empty keepalive envelope.
pub const FLAG_KEEPALIVE: u32 = 0x1;

/// A single dot on the board, in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A closed area captured by a participant.
pub type Polygon = Vec<Point>;

/// The unit of incremental state change exchanged between a client and a room.
///
/// An envelope carries any combination of new points, replaced areas, roster
/// entries, and a leave list. The same shape travels in both directions:
/// clients post their edits, the room fans them out to everyone else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating participant. Inbound values are overwritten with the
    /// session's authenticated id before the envelope reaches a room.
    #[serde(rename = "cid", default)]
    pub sender: ParticipantId,

    #[serde(rename = "fl", default)]
    pub flags: u32,

    /// New points, appended to each participant's drawing.
    #[serde(rename = "p", default, skip_serializing_if = "HashMap::is_empty")]
    pub points: HashMap<ParticipantId, Vec<Point>>,

    /// Captured areas; each participant's full area set replaces the last.
    #[serde(rename = "a", default, skip_serializing_if = "HashMap::is_empty")]
    pub areas: HashMap<ParticipantId, Vec<Polygon>>,

    /// Roster entries, upserted into the room's player list.
    #[serde(rename = "pl", default, skip_serializing_if = "HashMap::is_empty")]
    pub players: HashMap<ParticipantId, ColorScheme>,

    /// Participants leaving the board. Carried on the wire only; the
    /// persisted roster is never shrunk by this list.
    #[serde(rename = "l", default, skip_serializing_if = "Vec::is_empty")]
    pub leaving: Vec<ParticipantId>,
}

impl Envelope {
    /// Create a payload-empty keepalive envelope.
    pub fn keepalive() -> Self {
        Self {
            flags: FLAG_KEEPALIVE,
            ..Self::default()
        }
    }

    /// Create a point update posted by `sender`.
    pub fn points_update(sender: ParticipantId, points: Vec<Point>) -> Self {
        Self {
            sender,
            points: HashMap::from([(sender, points)]),
            ..Self::default()
        }
    }

    /// Create an area update posted by `sender`, replacing its area set.
    pub fn areas_update(sender: ParticipantId, areas: Vec<Polygon>) -> Self {
        Self {
            sender,
            areas: HashMap::from([(sender, areas)]),
            ..Self::default()
        }
    }

    /// Create a roster upsert for `participant`.
    pub fn roster_entry(participant: ParticipantId, scheme: ColorScheme) -> Self {
        Self {
            players: HashMap::from([(participant, scheme)]),
            ..Self::default()
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.flags & FLAG_KEEPALIVE != 0
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from a wire frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Persisted cumulative room state, delivered once to each new joiner.
///
/// Same shape as [`Envelope`] restricted to points, areas, and the player
/// roster; a snapshot never carries flags or a leave list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    pub points: HashMap<ParticipantId, Vec<Point>>,
    pub areas: HashMap<ParticipantId, Vec<Polygon>>,
    pub players: HashMap<ParticipantId, ColorScheme>,
}

impl HistorySnapshot {
    /// True when there is no prior work to replay.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.areas.is_empty() && self.players.is_empty()
    }

    /// Wrap the snapshot in an envelope for delivery to a joining client.
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            points: self.points,
            areas: self.areas,
            players: self.players,
            ..Envelope::default()
        }
    }
}

/// Derive a stable, visually distinct color scheme from a participant id.
///
/// The golden-ratio multiplier spreads consecutive ids across the hue wheel;
/// high saturation keeps cursors and areas readable against the board.
pub fn color_scheme_for(participant: ParticipantId) -> ColorScheme {
    let hue = participant.wrapping_mul(0x9E37_79B9_7F4A_7C15) % 360;
    format!("hsl({hue}, 70%, 60%)")
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let mut env = Envelope::points_update(7, vec![Point::new(1, 2), Point::new(3, 4)]);
        env.areas
            .insert(7, vec![vec![Point::new(0, 0), Point::new(0, 1), Point::new(1, 1)]]);
        env.players.insert(7, "hsl(10, 70%, 60%)".to_string());
        env.leaving.push(9);

        let frame = env.encode().unwrap();
        let decoded = Envelope::decode(&frame).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::points_update(7, vec![Point::new(1, 2)]);
        let frame = env.encode().unwrap();

        assert!(frame.contains("\"cid\":7"));
        assert!(frame.contains("\"fl\":0"));
        assert!(frame.contains("\"p\":{\"7\":[{\"x\":1,\"y\":2}]}"));
        // empty sections stay off the wire
        assert!(!frame.contains("\"a\""));
        assert!(!frame.contains("\"pl\""));
        assert!(!frame.contains("\"l\""));
    }

    #[test]
    fn test_decode_partial_frame() {
        let env = Envelope::decode(r#"{"cid":3,"p":{"3":[{"x":10,"y":20}]}}"#).unwrap();
        assert_eq!(env.sender, 3);
        assert_eq!(env.flags, 0);
        assert_eq!(env.points[&3], vec![Point::new(10, 20)]);
        assert!(env.areas.is_empty());
        assert!(env.players.is_empty());
        assert!(env.leaving.is_empty());
    }

    #[test]
    fn test_decode_invalid_frame() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"cid":"seven"}"#).is_err());
    }

    #[test]
    fn test_keepalive_envelope() {
        let env = Envelope::keepalive();
        assert!(env.is_keepalive());
        assert_eq!(env.sender, 0);

        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert!(decoded.is_keepalive());
        assert!(decoded.points.is_empty());
    }

    #[test]
    fn test_snapshot_into_envelope() {
        let snapshot = HistorySnapshot {
            points: HashMap::from([(1, vec![Point::new(5, 6)])]),
            areas: HashMap::new(),
            players: HashMap::from([(1, "hsl(42, 70%, 60%)".to_string())]),
        };
        assert!(!snapshot.is_empty());

        let env = snapshot.into_envelope();
        assert_eq!(env.sender, 0);
        assert_eq!(env.flags, 0);
        assert_eq!(env.points[&1], vec![Point::new(5, 6)]);
        assert!(env.leaving.is_empty());
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(HistorySnapshot::default().is_empty());
    }

    #[test]
    fn test_color_scheme_stable_and_distinct() {
        assert_eq!(color_scheme_for(1), color_scheme_for(1));
        assert_ne!(color_scheme_for(1), color_scheme_for(2));
        assert!(color_scheme_for(1).starts_with("hsl("));
    }
}
