// Append-only emotion snapshots. Rows are never edited in place; the latest
// snapshot by created_at is the current relationship reading.

use crate::atoms::error::EngineResult;
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, AgentStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSnapshotRow {
    pub uuid: String,
    pub relationship_type: String,
    pub emotional_tone: String,
    pub overall_score: i64,
    pub intimacy: i64,
    pub trust: i64,
    pub pleasure: i64,
    pub resonance: i64,
    pub dependence: i64,
    pub analysis_summary: String,
    pub created_at: String,
}

impl AgentStore {
    pub fn insert_emotion_snapshot(
        &self,
        relationship_type: &str,
        emotional_tone: &str,
        overall_score: i64,
        dims: [i64; 5],
        analysis_summary: &str,
    ) -> EngineResult<EmotionSnapshotRow> {
        let row = EmotionSnapshotRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            relationship_type: relationship_type.to_string(),
            emotional_tone: emotional_tone.to_string(),
            overall_score: overall_score.clamp(0, 100),
            intimacy: dims[0].clamp(0, 100),
            trust: dims[1].clamp(0, 100),
            pleasure: dims[2].clamp(0, 100),
            resonance: dims[3].clamp(0, 100),
            dependence: dims[4].clamp(0, 100),
            analysis_summary: analysis_summary.to_string(),
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO emotion_snapshots
                 (uuid, relationship_type, emotional_tone, overall_score,
                  intimacy, trust, pleasure, resonance, dependence,
                  analysis_summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                row.uuid,
                row.relationship_type,
                row.emotional_tone,
                row.overall_score,
                row.intimacy,
                row.trust,
                row.pleasure,
                row.resonance,
                row.dependence,
                row.analysis_summary,
                row.created_at
            ],
        )?;
        Ok(row)
    }

    pub fn latest_emotion_snapshot(&self) -> EngineResult<Option<EmotionSnapshotRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT uuid, relationship_type, emotional_tone, overall_score,
                        intimacy, trust, pleasure, resonance, dependence,
                        analysis_summary, created_at
                 FROM emotion_snapshots ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [],
                Self::map_snapshot,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Full history, oldest first — the trend view.
    pub fn list_emotion_snapshots(&self) -> EngineResult<Vec<EmotionSnapshotRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, relationship_type, emotional_tone, overall_score,
                    intimacy, trust, pleasure, resonance, dependence,
                    analysis_summary, created_at
             FROM emotion_snapshots ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([], Self::map_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmotionSnapshotRow> {
        Ok(EmotionSnapshotRow {
            uuid: row.get(0)?,
            relationship_type: row.get(1)?,
            emotional_tone: row.get(2)?,
            overall_score: row.get(3)?,
            intimacy: row.get(4)?,
            trust: row.get(5)?,
            pleasure: row.get(6)?,
            resonance: row.get(7)?,
            dependence: row.get(8)?,
            analysis_summary: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_append_and_latest_wins() {
        let store = AgentStore::open_in_memory().unwrap();
        store
            .insert_emotion_snapshot("stranger", "neutral", 20, [10, 20, 30, 20, 10], "first")
            .unwrap();
        store
            .insert_emotion_snapshot("friend", "warm", 55, [50, 60, 55, 50, 40], "second")
            .unwrap();

        let latest = store.latest_emotion_snapshot().unwrap().unwrap();
        assert_eq!(latest.relationship_type, "friend");
        assert_eq!(store.list_emotion_snapshots().unwrap().len(), 2);
    }

    #[test]
    fn scores_clamp_to_0_100() {
        let store = AgentStore::open_in_memory().unwrap();
        let row = store
            .insert_emotion_snapshot("x", "y", 150, [-5, 200, 50, 50, 50], "")
            .unwrap();
        assert_eq!(row.overall_score, 100);
        assert_eq!(row.intimacy, 0);
        assert_eq!(row.trust, 100);
    }
}
