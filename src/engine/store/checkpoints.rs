// Task-graph checkpoints keyed by thread id (usually the event id).
// The state blob is opaque JSON owned by the task graph engine.

use crate::atoms::error::EngineResult;

use super::{now_rfc3339, AgentStore};

impl AgentStore {
    pub fn save_checkpoint(&self, thread_id: &str, state: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_checkpoints (thread_id, state, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                 state = excluded.state,
                 updated_at = excluded.updated_at",
            rusqlite::params![thread_id, state, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_checkpoint(&self, thread_id: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock();
        let state = conn
            .query_row(
                "SELECT state FROM task_checkpoints WHERE thread_id = ?1",
                [thread_id],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(state)
    }
}
