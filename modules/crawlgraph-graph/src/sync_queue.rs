use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crawlgraph_common::{DataType, EntityId};

use crate::error::{Result, StoreError};
use crate::ops::WriteOp;

/// One deferred write as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub operation: String,
    pub args: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl QueueEntry {
    pub fn from_op(op: &WriteOp) -> Result<Self> {
        let value = serde_json::to_value(op)?;
        Ok(Self {
            operation: value["operation"].as_str().unwrap_or(op.name()).to_string(),
            args: value.get("args").cloned().unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        })
    }

    pub fn to_op(&self) -> Result<WriteOp> {
        let value = serde_json::json!({ "operation": self.operation, "args": self.args });
        Ok(serde_json::from_value(value)?)
    }

    fn writes_cursor(&self, key: (EntityId, DataType)) -> bool {
        self.to_op()
            .ok()
            .and_then(|op| op.cursor_key())
            .is_some_and(|k| k == key)
    }
}

/// Ordered JSON-file list of writes that could not reach the graph.
pub struct SyncQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<QueueEntry>> {
        let _guard = self.guard()?;
        self.read_entries()
    }

    /// Append a write. A queued cursor write for the same entity and data
    /// type is replaced, since only the newest one may reach the graph.
    pub fn push(&self, op: &WriteOp) -> Result<()> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;
        if let Some(key) = op.cursor_key() {
            entries.retain(|e| !e.writes_cursor(key));
        }
        entries.push(QueueEntry::from_op(op)?);
        self.write_entries(&entries)?;
        warn!(
            operation = op.name(),
            queued = entries.len(),
            path = %self.path.display(),
            "Write deferred to sync queue"
        );
        Ok(())
    }

    /// Drop queued cursor writes made obsolete by one that reached the graph.
    pub fn discard_cursor_writes(&self, key: (EntityId, DataType)) -> Result<usize> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|e| !e.writes_cursor(key));
        let dropped = before - entries.len();
        if dropped > 0 {
            self.write_entries(&entries)?;
            debug!(
                entity_id = key.0,
                data_type = key.1.as_str(),
                dropped,
                "Superseded queued cursor writes"
            );
        }
        Ok(dropped)
    }

    /// Replace the contents; an empty list removes the file.
    pub fn replace(&self, entries: &[QueueEntry]) -> Result<()> {
        let _guard = self.guard()?;
        self.write_entries(entries)
    }

    fn read_entries(&self) -> Result<Vec<QueueEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_entries(&self, entries: &[QueueEntry]) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
                debug!(path = %self.path.display(), "Sync queue drained");
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Queue("sync queue lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_common::{DataType, ResumeCursor};

    #[test]
    fn push_load_and_drain() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SyncQueue::new(dir.path().join("neo4j_sync_queue.json"));

        let op = WriteOp::SaveCursor {
            entity_id: 7,
            data_type: DataType::Followers,
            cursor: ResumeCursor::new("abc", 50),
        };
        queue.push(&op).unwrap();
        queue.push(&WriteOp::ClearCursor { entity_id: 7, data_type: DataType::Posts }).unwrap();

        let entries = queue.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "save_cursor");
        assert_eq!(entries[0].to_op().unwrap(), op);

        queue.replace(&[]).unwrap();
        assert!(!queue.path().exists());
        assert!(queue.load().unwrap().is_empty());
    }

    #[test]
    fn newer_cursor_write_replaces_queued_one() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SyncQueue::new(dir.path().join("neo4j_sync_queue.json"));

        let save = |count| WriteOp::SaveCursor {
            entity_id: 7,
            data_type: DataType::Followers,
            cursor: ResumeCursor::new("abc", count),
        };
        queue.push(&save(50)).unwrap();
        queue.push(&WriteOp::UpsertEntities(vec![])).unwrap();
        queue.push(&save(100)).unwrap();
        queue.push(&WriteOp::SaveCursor {
            entity_id: 7,
            data_type: DataType::Followees,
            cursor: ResumeCursor::new("xyz", 10),
        })
        .unwrap();

        let ops: Vec<WriteOp> = queue.load().unwrap().iter().map(|e| e.to_op().unwrap()).collect();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].name(), "upsert_entities");
        assert_eq!(ops[1], save(100));

        assert_eq!(queue.discard_cursor_writes((7, DataType::Followers)).unwrap(), 1);
        assert_eq!(queue.discard_cursor_writes((7, DataType::Followers)).unwrap(), 0);
        assert_eq!(queue.load().unwrap().len(), 2);
    }
}
