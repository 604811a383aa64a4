// Short-term message log + metadata key/value store.
// The short-term log is the bounded conversation window; archival moves the
// oldest rounds into `summaries` and deletes them here (see summaries.rs).
// Counters like `total_conversations` live in the metadata table so they
// survive restarts — no in-memory singletons.

use crate::atoms::error::EngineResult;
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, AgentStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

impl AgentStore {
    /// Append a message to the short-term log.
    pub fn add_message(&self, role: &str, content: &str) -> EngineResult<StoredMessage> {
        let msg = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![msg.id, msg.role, msg.content, msg.created_at],
        )?;
        Ok(msg)
    }

    /// All short-term messages in insertion order.
    pub fn all_messages(&self) -> EngineResult<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM messages ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent `count` messages, still in chronological order.
    pub fn recent_messages(&self, count: usize) -> EngineResult<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM (
                 SELECT id, role, content, created_at, rowid AS rid FROM messages
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1
             ) ORDER BY created_at, rid",
        )?;
        let rows = stmt
            .query_map([count as i64], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of user messages currently in the short-term log.
    pub fn count_user_messages(&self) -> EngineResult<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE role = 'user'",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // ── Metadata key/value ─────────────────────────────────────────────

    pub fn get_metadata(&self, key: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Integer counter helper over the metadata table; missing keys read 0.
    pub fn get_counter(&self, key: &str) -> EngineResult<u64> {
        Ok(self
            .get_metadata(key)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0))
    }

    pub fn set_counter(&self, key: &str, value: u64) -> EngineResult<()> {
        self.set_metadata(key, &value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_fetch_in_order() {
        let store = AgentStore::open_in_memory().unwrap();
        store.add_message("user", "hello").unwrap();
        store.add_message("assistant", "hi there").unwrap();
        store.add_message("user", "how are you").unwrap();

        let all = store.all_messages().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "hello");
        assert_eq!(all[2].content, "how are you");
        assert_eq!(store.count_user_messages().unwrap(), 2);
    }

    #[test]
    fn recent_messages_keeps_chronological_order() {
        let store = AgentStore::open_in_memory().unwrap();
        for i in 0..6 {
            store.add_message("user", &format!("m{i}")).unwrap();
        }
        let recent = store.recent_messages(3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn counters_default_to_zero_and_round_trip() {
        let store = AgentStore::open_in_memory().unwrap();
        assert_eq!(store.get_counter("total_conversations").unwrap(), 0);
        store.set_counter("total_conversations", 42).unwrap();
        assert_eq!(store.get_counter("total_conversations").unwrap(), 42);
    }
}
