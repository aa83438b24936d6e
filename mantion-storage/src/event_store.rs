use crate::error::StorageError;
use chrono::{DateTime, Utc};
use mantion_core::{DetectionEvent, DetectionType};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    camera_id TEXT NOT NULL,
    detection_type TEXT NOT NULL,
    artifact_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_detections_time ON detections(timestamp DESC);
"#;

/// Append-only detection table.
/// Each call opens its own WAL connection, so readers never block the writer.
#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path };
        store.conn()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        Ok(conn)
    }

    /// Insert one event, returning its row id
    pub fn append(&self, event: &DetectionEvent) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        append_with(&conn, event)
    }

    /// Latest events first
    pub fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, camera_id, detection_type, artifact_path
             FROM detections ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RawEvent {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                camera_id: row.get(2)?,
                detection_type: row.get(3)?,
                artifact_path: row.get(4)?,
            })
        })?;

        let mut events = Vec::new();
        for raw in rows {
            events.push(raw?.into_event()?);
        }
        Ok(events)
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Shared by `EventStore::append` and the queue writer's long-lived connection
pub(crate) fn append_with(conn: &Connection, event: &DetectionEvent) -> Result<i64, StorageError> {
    // Stored as TEXT, so it must survive the round trip unchanged
    let artifact = match &event.artifact_path {
        Some(path) => Some(
            path.to_str()
                .ok_or_else(|| StorageError::NonUtf8Path(path.display().to_string()))?,
        ),
        None => None,
    };
    conn.execute(
        "INSERT INTO detections (timestamp, camera_id, detection_type, artifact_path)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.timestamp.to_rfc3339(),
            event.camera_id,
            event.detection_type.as_str(),
            artifact,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

struct RawEvent {
    id: i64,
    timestamp: String,
    camera_id: String,
    detection_type: String,
    artifact_path: Option<String>,
}

impl RawEvent {
    fn into_event(self) -> Result<DetectionEvent, StorageError> {
        let id = self.id;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StorageError::Corrupt { id, reason: e.to_string() })?
            .with_timezone(&Utc);
        let detection_type = self
            .detection_type
            .parse::<DetectionType>()
            .map_err(|e| StorageError::Corrupt { id, reason: e.to_string() })?;

        Ok(DetectionEvent {
            id: Some(id),
            timestamp,
            camera_id: self.camera_id,
            detection_type,
            artifact_path: self.artifact_path.map(PathBuf::from),
        })
    }
}
