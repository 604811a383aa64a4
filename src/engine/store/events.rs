// Event rows and their append-only logs. Events are created by the host;
// the kernel only transitions status and appends log entries. Task events
// carry {task_requirements, completion_criteria} in the metadata JSON.

use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now_rfc3339, AgentStore};

pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_TASK: &str = "task";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub title: String,
    pub description: String,
    pub kind: String,
    pub priority: i64,
    pub status: String,
    pub metadata: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogRow {
    pub event_id: String,
    pub ts: String,
    pub action: String,
    pub content: String,
}

impl AgentStore {
    pub fn insert_event(
        &self,
        title: &str,
        description: &str,
        kind: &str,
        priority: i64,
        metadata: Value,
    ) -> EngineResult<EventRow> {
        let row = EventRow {
            event_id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            kind: kind.to_string(),
            priority,
            status: STATUS_PENDING.to_string(),
            metadata,
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (event_id, title, description, kind, priority, status, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.event_id,
                row.title,
                row.description,
                row.kind,
                row.priority,
                row.status,
                row.metadata.to_string(),
                row.created_at
            ],
        )?;
        Ok(row)
    }

    pub fn get_event(&self, event_id: &str) -> EngineResult<Option<EventRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT event_id, title, description, kind, priority, status, metadata, created_at
                 FROM events WHERE event_id = ?1",
                [event_id],
                Self::map_event,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    pub fn list_events(&self) -> EngineResult<Vec<EventRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, title, description, kind, priority, status, metadata, created_at
             FROM events ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], Self::map_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transition status and append the transition note in one transaction.
    pub fn update_event_status(
        &self,
        event_id: &str,
        status: &str,
        note: &str,
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE events SET status = ?2 WHERE event_id = ?1",
            [event_id, status],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!("event {event_id}")));
        }
        tx.execute(
            "INSERT INTO event_logs (event_id, ts, action, content) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![event_id, now_rfc3339(), format!("status:{status}"), note],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn append_event_log(
        &self,
        event_id: &str,
        action: &str,
        content: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_logs (event_id, ts, action, content) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![event_id, now_rfc3339(), action, content],
        )?;
        Ok(())
    }

    pub fn event_logs(&self, event_id: &str) -> EngineResult<Vec<EventLogRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, ts, action, content FROM event_logs
             WHERE event_id = ?1 ORDER BY ts, id",
        )?;
        let rows = stmt
            .query_map([event_id], |row| {
                Ok(EventLogRow {
                    event_id: row.get(0)?,
                    ts: row.get(1)?,
                    action: row.get(2)?,
                    content: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Merge keys into the event's metadata JSON (object-level merge).
    pub fn merge_event_metadata(&self, event_id: &str, patch: Value) -> EngineResult<()> {
        let event = self
            .get_event(event_id)?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))?;
        let mut metadata = event.metadata;
        if let (Some(obj), Some(patch_obj)) = (metadata.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        } else {
            metadata = patch;
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE events SET metadata = ?2 WHERE event_id = ?1",
            rusqlite::params![event_id, metadata.to_string()],
        )?;
        Ok(())
    }

    fn map_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
        let metadata: String = row.get(6)?;
        Ok(EventRow {
            event_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            kind: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            created_at: row.get(7)?,
        })
    }
}
