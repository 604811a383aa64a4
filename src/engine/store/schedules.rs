// Schedule rows. Times are naive local ISO strings ("2024-01-15T10:00:00")
// so lexicographic comparison in SQL matches chronological order; the
// schedule engine owns parsing and interval arithmetic.
//
// Soft delete: conflict dismissal and similarity resolution both retire rows
// by clearing is_active through the single soft_delete_schedule() entry
// point, keeping the behavior auditable.

use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, AgentStore};

pub const KIND_RECURRING: &str = "recurring";
pub const KIND_APPOINTMENT: &str = "appointment";
pub const KIND_TEMPORARY: &str = "temporary";

pub const COLLAB_NONE: &str = "none";
pub const COLLAB_PENDING: &str = "pending";
pub const COLLAB_ACCEPTED: &str = "accepted";
pub const COLLAB_DECLINED: &str = "declined";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub schedule_id: String,
    pub title: String,
    pub description: String,
    pub kind: String,
    pub start_time: String,
    pub end_time: String,
    pub priority: i64,
    pub weekday: Option<i64>,
    pub recurrence_pattern: Option<String>,
    pub generated_reason: Option<String>,
    pub involves_user: bool,
    pub collaboration_status: String,
    pub is_queryable: bool,
    pub is_active: bool,
    pub source: String,
    pub created_at: String,
}

impl ScheduleRow {
    /// Fresh row with identity and timestamps filled in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: &str,
        description: &str,
        kind: &str,
        start_time: &str,
        end_time: &str,
        priority: i64,
        source: &str,
    ) -> Self {
        Self {
            schedule_id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            kind: kind.to_string(),
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            priority,
            weekday: None,
            recurrence_pattern: None,
            generated_reason: None,
            involves_user: false,
            collaboration_status: COLLAB_NONE.to_string(),
            is_queryable: true,
            is_active: true,
            source: source.to_string(),
            created_at: now_rfc3339(),
        }
    }
}

impl AgentStore {
    pub fn insert_schedule(&self, row: &ScheduleRow) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO schedules
                 (schedule_id, title, description, kind, start_time, end_time,
                  priority, weekday, recurrence_pattern, generated_reason,
                  involves_user, collaboration_status, is_queryable, is_active,
                  source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                row.schedule_id,
                row.title,
                row.description,
                row.kind,
                row.start_time,
                row.end_time,
                row.priority,
                row.weekday,
                row.recurrence_pattern,
                row.generated_reason,
                row.involves_user as i64,
                row.collaboration_status,
                row.is_queryable as i64,
                row.is_active as i64,
                row.source,
                row.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_schedule(&self, schedule_id: &str) -> EngineResult<Option<ScheduleRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE schedule_id = ?1"),
                [schedule_id],
                Self::map_schedule,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(row)
    }

    /// Retire a schedule (is_active=0). Both conflict dismissal and
    /// similarity resolution go through here.
    pub fn soft_delete_schedule(&self, schedule_id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE schedules SET is_active = 0 WHERE schedule_id = ?1",
            [schedule_id],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!("schedule {schedule_id}")));
        }
        Ok(())
    }

    pub fn set_schedule_collaboration(
        &self,
        schedule_id: &str,
        collaboration_status: &str,
        is_queryable: bool,
        is_active: bool,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE schedules
             SET collaboration_status = ?2, is_queryable = ?3, is_active = ?4
             WHERE schedule_id = ?1",
            rusqlite::params![schedule_id, collaboration_status, is_queryable as i64, is_active as i64],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!("schedule {schedule_id}")));
        }
        Ok(())
    }

    /// Non-recurring schedules strictly overlapping [start, end):
    /// `start_time < end AND end_time > start`.
    pub fn overlapping_schedules(
        &self,
        start: &str,
        end: &str,
        queryable_only: bool,
        active_only: bool,
    ) -> EngineResult<Vec<ScheduleRow>> {
        let conn = self.conn.lock();
        let mut sql = format!(
            "{SELECT_COLUMNS} WHERE kind != '{KIND_RECURRING}'
               AND start_time < ?2 AND end_time > ?1"
        );
        if queryable_only {
            sql.push_str(" AND is_queryable = 1");
        }
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY start_time");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([start, end], Self::map_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recurring schedules (materialised into concrete dates by the engine).
    pub fn recurring_schedules(
        &self,
        queryable_only: bool,
        active_only: bool,
    ) -> EngineResult<Vec<ScheduleRow>> {
        let conn = self.conn.lock();
        let mut sql = format!("{SELECT_COLUMNS} WHERE kind = '{KIND_RECURRING}'");
        if queryable_only {
            sql.push_str(" AND is_queryable = 1");
        }
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY start_time");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::map_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pending user-collaboration schedules, newest first.
    pub fn pending_collaboration_schedules(&self) -> EngineResult<Vec<ScheduleRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE collaboration_status = '{COLLAB_PENDING}'
               AND is_active = 1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
            .query_map([], Self::map_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_schedules(&self) -> EngineResult<Vec<ScheduleRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY start_time"))?;
        let rows = stmt
            .query_map([], Self::map_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
        Ok(ScheduleRow {
            schedule_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            kind: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            priority: row.get(6)?,
            weekday: row.get(7)?,
            recurrence_pattern: row.get(8)?,
            generated_reason: row.get(9)?,
            involves_user: row.get::<_, i64>(10)? != 0,
            collaboration_status: row.get(11)?,
            is_queryable: row.get::<_, i64>(12)? != 0,
            is_active: row.get::<_, i64>(13)? != 0,
            source: row.get(14)?,
            created_at: row.get(15)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT schedule_id, title, description, kind, start_time, end_time,
        priority, weekday, recurrence_pattern, generated_reason, involves_user,
        collaboration_status, is_queryable, is_active, source, created_at
 FROM schedules";

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(title: &str, start: &str, end: &str) -> ScheduleRow {
        ScheduleRow::new(title, "", KIND_APPOINTMENT, start, end, 2, "test")
    }

    #[test]
    fn strict_overlap_excludes_touching_intervals() {
        let store = AgentStore::open_in_memory().unwrap();
        store
            .insert_schedule(&appointment("a", "2024-01-15T10:00:00", "2024-01-15T11:00:00"))
            .unwrap();

        // B starts exactly when A ends: no overlap.
        let hits = store
            .overlapping_schedules("2024-01-15T11:00:00", "2024-01-15T12:00:00", false, true)
            .unwrap();
        assert!(hits.is_empty());

        let hits = store
            .overlapping_schedules("2024-01-15T10:30:00", "2024-01-15T11:30:00", false, true)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn soft_delete_hides_from_active_queries() {
        let store = AgentStore::open_in_memory().unwrap();
        let row = appointment("a", "2024-01-15T10:00:00", "2024-01-15T11:00:00");
        store.insert_schedule(&row).unwrap();
        store.soft_delete_schedule(&row.schedule_id).unwrap();

        let hits = store
            .overlapping_schedules("2024-01-15T09:00:00", "2024-01-15T12:00:00", false, true)
            .unwrap();
        assert!(hits.is_empty());

        // Row still exists — only retired.
        let fetched = store.get_schedule(&row.schedule_id).unwrap().unwrap();
        assert!(!fetched.is_active);
    }

    #[test]
    fn pending_collaboration_newest_first() {
        let store = AgentStore::open_in_memory().unwrap();
        let mut first = appointment("first", "2024-01-15T10:00:00", "2024-01-15T11:00:00");
        first.collaboration_status = COLLAB_PENDING.into();
        first.is_queryable = false;
        store.insert_schedule(&first).unwrap();

        let mut second = appointment("second", "2024-01-16T10:00:00", "2024-01-16T11:00:00");
        second.collaboration_status = COLLAB_PENDING.into();
        second.is_queryable = false;
        store.insert_schedule(&second).unwrap();

        let pending = store.pending_collaboration_schedules().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].title, "second");
    }
}
