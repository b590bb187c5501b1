//! Detection cache.
//!
//! Detector inference dominates run time, so per-video detection sequences are
//! persisted and reused. An entry is keyed by the video source and the track
//! kind. Writes are all-or-nothing: a reader sees the previous entry or the new
//! one, never a torn write. Unreadable entries behave as a miss.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::TrackError;
use crate::DetectionSequence;

/// Which sequence of a video an entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Player,
    Ball,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Player => "player",
            TrackKind::Ball => "ball",
        }
    }
}

/// Cache key: source identifier plus track kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub kind: TrackKind,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }

    pub fn player(source: impl Into<String>) -> Self {
        Self::new(source, TrackKind::Player)
    }

    pub fn ball(source: impl Into<String>) -> Self {
        Self::new(source, TrackKind::Ball)
    }

    /// Filesystem-safe name, unique per key.
    pub fn file_name(&self) -> String {
        let stem: String = Path::new(&self.source)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();
        let digest = hex::encode(Sha256::digest(self.source.as_bytes()));
        format!("{}-{}_{}_detections.json", stem, &digest[..16], self.kind.as_str())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.source, self.kind.as_str())
    }
}

pub trait DetectionCache {
    /// Load an entry. Absent entries are `CacheMiss`, unreadable ones `CacheCorrupt`.
    fn try_load(&mut self, key: &CacheKey) -> Result<DetectionSequence, TrackError>;

    /// Persist an entry, replacing any previous value atomically.
    fn store(&mut self, key: &CacheKey, sequence: &DetectionSequence) -> Result<()>;

    /// Load an entry, treating corruption as a miss.
    fn load(&mut self, key: &CacheKey) -> Option<DetectionSequence> {
        match self.try_load(key) {
            Ok(sequence) => Some(sequence),
            Err(TrackError::CacheMiss(_)) => None,
            Err(e) => {
                log::warn!("ignoring cache entry {}: {}", key, e);
                None
            }
        }
    }
}

fn decode(key: &CacheKey, payload: &str) -> Result<DetectionSequence, TrackError> {
    DetectionSequence::from_json(payload).map_err(|e| TrackError::CacheCorrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn digest_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

// -------------------- SQLite --------------------

pub struct SqliteDetectionCache {
    conn: Connection,
}

impl SqliteDetectionCache {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut cache = Self { conn };
        cache.ensure_schema()?;
        Ok(cache)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_cache (
              source TEXT NOT NULL,
              kind TEXT NOT NULL,
              frame_count INTEGER NOT NULL,
              payload_json TEXT NOT NULL,
              payload_sha256 TEXT NOT NULL,
              PRIMARY KEY (source, kind)
            );
            "#,
        )?;
        Ok(())
    }
}

impl DetectionCache for SqliteDetectionCache {
    fn try_load(&mut self, key: &CacheKey) -> Result<DetectionSequence, TrackError> {
        let corrupt = |reason: String| TrackError::CacheCorrupt {
            key: key.to_string(),
            reason,
        };
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT payload_json, payload_sha256 FROM detection_cache WHERE source = ?1 AND kind = ?2",
                params![key.source, key.kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| corrupt(e.to_string()))?;
        let Some((payload, digest)) = row else {
            return Err(TrackError::CacheMiss(key.to_string()));
        };
        if digest_hex(payload.as_bytes()) != digest {
            return Err(corrupt("payload digest mismatch".to_string()));
        }
        decode(key, &payload)
    }

    fn store(&mut self, key: &CacheKey, sequence: &DetectionSequence) -> Result<()> {
        let payload = sequence.to_json()?;
        let digest = digest_hex(payload.as_bytes());
        let frame_count = i64::try_from(sequence.len())
            .map_err(|_| anyhow!("sequence length exceeds i64 range"))?;
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO detection_cache(source, kind, frame_count, payload_json, payload_sha256)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(source, kind) DO UPDATE SET
              frame_count = excluded.frame_count,
              payload_json = excluded.payload_json,
              payload_sha256 = excluded.payload_sha256
            "#,
            params![key.source, key.kind.as_str(), frame_count, payload, digest],
        )?;
        tx.commit()?;
        log::debug!("cached {} frames for {}", sequence.len(), key);
        Ok(())
    }
}

// -------------------- JSON files --------------------

/// One JSON file per entry, in the persisted `[{"<id>": [x1, y1, x2, y2]}]` layout.
pub struct JsonFileDetectionCache {
    dir: PathBuf,
}

impl JsonFileDetectionCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("failed to create cache dir {}: {}", dir.display(), e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl DetectionCache for JsonFileDetectionCache {
    fn try_load(&mut self, key: &CacheKey) -> Result<DetectionSequence, TrackError> {
        let path = self.path_for(key);
        let payload = match fs::read_to_string(&path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrackError::CacheMiss(key.to_string()))
            }
            Err(e) => {
                return Err(TrackError::CacheCorrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        decode(key, &payload)
    }

    fn store(&mut self, key: &CacheKey, sequence: &DetectionSequence) -> Result<()> {
        let payload = sequence.to_json()?;
        write_atomic(&self.path_for(key), payload.as_bytes())?;
        log::debug!("cached {} frames for {}", sequence.len(), key);
        Ok(())
    }
}

// -------------------- In-memory --------------------

/// Holds serialized payloads so loads go through the same decode path.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionCache {
    entries: HashMap<CacheKey, String>,
}

impl InMemoryDetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite an entry with an arbitrary payload.
    pub fn insert_raw(&mut self, key: CacheKey, payload: impl Into<String>) {
        self.entries.insert(key, payload.into());
    }
}

impl DetectionCache for InMemoryDetectionCache {
    fn try_load(&mut self, key: &CacheKey) -> Result<DetectionSequence, TrackError> {
        match self.entries.get(key) {
            Some(payload) => decode(key, payload),
            None => Err(TrackError::CacheMiss(key.to_string())),
        }
    }

    fn store(&mut self, key: &CacheKey, sequence: &DetectionSequence) -> Result<()> {
        self.entries.insert(key.clone(), sequence.to_json()?);
        Ok(())
    }
}

/// Open the cache backend named by configuration.
pub fn open_cache(backend: &str, path: &str) -> Result<Box<dyn DetectionCache>> {
    match backend {
        "sqlite" => Ok(Box::new(SqliteDetectionCache::open(path)?)),
        "json" => Ok(Box::new(JsonFileDetectionCache::open(path)?)),
        "memory" => Ok(Box::new(InMemoryDetectionCache::new())),
        other => Err(anyhow!("unknown cache backend: {}", other)),
    }
}

/// Write through a sibling temp file and rename into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| anyhow!("invalid output path {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
