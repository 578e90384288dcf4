//! In-memory history store for tests and storage-less dev runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{HistoryStore, StoreError};
use crate::protocol::{ColorScheme, Envelope, HistorySnapshot, ParticipantId, Point, Polygon, RoomId};

#[derive(Debug, Clone, Default)]
struct RoomRecord {
    points: HashMap<ParticipantId, Vec<Point>>,
    areas: HashMap<ParticipantId, Vec<Polygon>>,
    players: HashMap<ParticipantId, ColorScheme>,
}

/// History store backed by a plain map. State lives as long as the process,
/// which is enough for room teardown/re-acquire cycles within one run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<RoomId, RoomRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    fn load_history(&self, room: RoomId) -> Result<HistorySnapshot, StoreError> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let record = match rooms.get(&room) {
            Some(record) => record,
            None => return Ok(HistorySnapshot::default()),
        };
        Ok(HistorySnapshot {
            points: record.points.clone(),
            areas: record.areas.clone(),
            players: record.players.clone(),
        })
    }

    fn post_history(&self, room: RoomId, envelope: &Envelope) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let record = rooms.entry(room).or_default();

        for (participant, points) in &envelope.points {
            record
                .points
                .entry(*participant)
                .or_default()
                .extend(points.iter().copied());
        }
        for (participant, areas) in &envelope.areas {
            record.areas.insert(*participant, areas.clone());
        }
        for (participant, scheme) in &envelope.players {
            record.players.insert(*participant, scheme.clone());
        }
        // envelope.leaving is wire-only; the roster keeps departed players

        Ok(())
    }
}
