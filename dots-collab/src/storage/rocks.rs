//! RocksDB-backed room history store.
//!
//! Column families:
//! - `points`  — a participant's accumulated points (JSON `Vec<Point>`)
//! - `areas`   — a participant's current area set (JSON `Vec<Polygon>`)
//! - `players` — a participant's roster entry (UTF-8 color scheme)
//!
//! Every row is keyed `<room_id:8 BE><participant:8 BE>`, so one room's
//! history is a contiguous key range scanned with a fixed 8-byte prefix.
//! The point-row read-modify-write needs no further coordination: all
//! writes for one room come from that room's single actor.

use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, Direction,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::PathBuf;

use super::{HistoryStore, StoreError};
use crate::protocol::{Envelope, HistorySnapshot, ParticipantId, Point, Polygon, RoomId};

const CF_POINTS: &str = "points";
const CF_AREAS: &str = "areas";
const CF_PLAYERS: &str = "players";

const COLUMN_FAMILIES: &[&str] = &[CF_POINTS, CF_AREAS, CF_PLAYERS];

/// Length of the room-id key prefix.
const PREFIX_LEN: usize = 8;
/// Full row key length: room id + participant id.
const KEY_LEN: usize = 16;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dots_data"),
            sync_writes: false,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (temp directory, small limits).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// RocksDB-backed implementation of [`HistoryStore`].
pub struct RoomStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RoomStore {
    /// Open the store at the configured path, creating the database and
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(DBCompressionType::Lz4);
        // Rows for one room share an 8-byte prefix; scans stay within it
        opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_LEN));

        if name == CF_PLAYERS {
            // Small values, frequent point lookups from the roster flow
            opts.optimize_for_point_lookup(8 * 1024 * 1024);
        }

        opts
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("missing column family: {name}")))
    }

    fn row_key(room: RoomId, participant: ParticipantId) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key[..PREFIX_LEN].copy_from_slice(&room.to_be_bytes());
        key[PREFIX_LEN..].copy_from_slice(&participant.to_be_bytes());
        key
    }

    fn participant_of(key: &[u8]) -> Option<ParticipantId> {
        if key.len() != KEY_LEN {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[PREFIX_LEN..]);
        Some(ParticipantId::from_be_bytes(buf))
    }

    /// Collect all rows of one room from a column family, decoding values
    /// with `decode`.
    fn scan_room<T>(
        &self,
        cf_name: &str,
        room: RoomId,
        decode: impl Fn(&[u8]) -> Result<T, StoreError>,
    ) -> Result<Vec<(ParticipantId, T)>, StoreError> {
        let cf = self.cf(cf_name)?;
        let prefix = room.to_be_bytes();

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop once we've passed this room's key prefix
            if key.len() < PREFIX_LEN || key[..PREFIX_LEN] != prefix {
                break;
            }
            let Some(participant) = Self::participant_of(&key) else {
                continue;
            };
            rows.push((participant, decode(&value)?));
        }

        Ok(rows)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

impl HistoryStore for RoomStore {
    fn load_history(&self, room: RoomId) -> Result<HistorySnapshot, StoreError> {
        let points = self.scan_room(CF_POINTS, room, |value| {
            serde_json::from_slice::<Vec<Point>>(value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))
        })?;
        let areas = self.scan_room(CF_AREAS, room, |value| {
            serde_json::from_slice::<Vec<Polygon>>(value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))
        })?;
        let players = self.scan_room(CF_PLAYERS, room, |value| {
            Ok(String::from_utf8_lossy(value).into_owned())
        })?;

        Ok(HistorySnapshot {
            points: points.into_iter().collect(),
            areas: areas.into_iter().collect(),
            players: players.into_iter().collect(),
        })
    }

    fn post_history(&self, room: RoomId, envelope: &Envelope) -> Result<(), StoreError> {
        let cf_points = self.cf(CF_POINTS)?;
        let cf_areas = self.cf(CF_AREAS)?;
        let cf_players = self.cf(CF_PLAYERS)?;

        let mut batch = WriteBatch::default();

        for (participant, new_points) in &envelope.points {
            let key = Self::row_key(room, *participant);
            let mut row: Vec<Point> = match self.db.get_cf(&cf_points, key)? {
                Some(value) => serde_json::from_slice(&value)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?,
                None => Vec::new(),
            };
            row.extend(new_points.iter().copied());
            let value = serde_json::to_vec(&row)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.put_cf(&cf_points, key, value);
        }

        for (participant, areas) in &envelope.areas {
            let value = serde_json::to_vec(areas)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.put_cf(&cf_areas, Self::row_key(room, *participant), value);
        }

        for (participant, scheme) in &envelope.players {
            batch.put_cf(&cf_players, Self::row_key(room, *participant), scheme.as_bytes());
        }
        // envelope.leaving is wire-only; roster rows are never deleted here

        if !batch.is_empty() {
            self.write(batch)?;
        }
        Ok(())
    }
}
