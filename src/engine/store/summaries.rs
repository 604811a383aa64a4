// Long-term topic summaries. Rows are only created by archival, which moves
// the oldest short-term rounds here inside one transaction so a crash can
// never lose messages without the summary (or vice versa).

use crate::atoms::error::EngineResult;
use serde::{Deserialize, Serialize};

use super::AgentStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub uuid: String,
    pub summary: String,
    pub rounds: i64,
    pub message_count: i64,
    pub created_at: String,
    pub ended_at: String,
}

impl AgentStore {
    /// Persist a summary and delete the archived messages atomically.
    pub fn archive_messages(
        &self,
        summary: &str,
        rounds: i64,
        message_ids: &[String],
        created_at: &str,
        ended_at: &str,
    ) -> EngineResult<SummaryRow> {
        let row = SummaryRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            summary: summary.to_string(),
            rounds,
            message_count: message_ids.len() as i64,
            created_at: created_at.to_string(),
            ended_at: ended_at.to_string(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO summaries (uuid, summary, rounds, message_count, created_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                row.uuid,
                row.summary,
                row.rounds,
                row.message_count,
                row.created_at,
                row.ended_at
            ],
        )?;
        {
            let mut stmt = tx.prepare("DELETE FROM messages WHERE id = ?1")?;
            for id in message_ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(row)
    }

    /// All summaries ordered by creation time.
    pub fn list_summaries(&self) -> EngineResult<Vec<SummaryRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, summary, rounds, message_count, created_at, ended_at
             FROM summaries ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SummaryRow {
                    uuid: row.get(0)?,
                    summary: row.get(1)?,
                    rounds: row.get(2)?,
                    message_count: row.get(3)?,
                    created_at: row.get(4)?,
                    ended_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
