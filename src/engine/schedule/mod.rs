// Eidolon Engine — Schedule Engine
// Three schedule kinds:
//   recurring   — weekly by weekday (0 = Monday … 6 = Sunday)
//   appointment — a concrete interval, usually created from user intent
//   temporary   — generated filler activities for otherwise free days
//
// Creation walks: validation → conflict check → similarity check →
// collaboration flags. Conflicts use the strict overlap rule
// (aStart < bEnd ∧ bStart < aEnd); a conflict is dismissible only when the
// new schedule's priority strictly exceeds every conflicting schedule's, in
// which case the losers are soft-deleted. Similarity is an LLM judgement
// that may refuse the new schedule or retire the existing peer; an
// unreachable similarity service skips the check rather than failing the
// creation.

pub mod generator;
pub mod similarity;

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::providers::ChatModel;
use crate::engine::store::{
    AgentStore, ScheduleRow, COLLAB_ACCEPTED, COLLAB_DECLINED, COLLAB_NONE, COLLAB_PENDING,
    KIND_APPOINTMENT, KIND_RECURRING, KIND_TEMPORARY,
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use similarity::{SimilarityChecker, SimilarityVerdict};

// ── Kinds and priorities ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Recurring,
    Appointment,
    Temporary,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Recurring => KIND_RECURRING,
            ScheduleKind::Appointment => KIND_APPOINTMENT,
            ScheduleKind::Temporary => KIND_TEMPORARY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl SchedulePriority {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }
}

// ── Creation parameters ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub title: String,
    pub description: String,
    pub kind: ScheduleKind,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub priority: SchedulePriority,
    /// Required for recurring schedules; 0 = Monday … 6 = Sunday.
    pub weekday: Option<u8>,
    pub recurrence_pattern: Option<String>,
    pub generated_reason: Option<String>,
    pub involves_user: bool,
    pub source: String,
    pub check_conflict: bool,
    pub check_similarity: bool,
}

impl CreateSchedule {
    pub fn appointment(
        title: &str,
        description: &str,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        priority: SchedulePriority,
    ) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            kind: ScheduleKind::Appointment,
            start_time,
            end_time,
            priority,
            weekday: None,
            recurrence_pattern: None,
            generated_reason: None,
            involves_user: false,
            source: "manual".to_string(),
            check_conflict: false,
            check_similarity: false,
        }
    }
}

// ── Time formatting ────────────────────────────────────────────────────────

pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_time(t: NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn parse_time(s: &str) -> EngineResult<NaiveDateTime> {
    // Accept both plain seconds and fractional/offset tails by trying the
    // strict format first, then the RFC 3339 prefix.
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&s[..19.min(s.len())], TIME_FORMAT))
        .map_err(|e| EngineError::bad_input(format!("unparsable time '{s}': {e}")))
}

// ── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleStats {
    pub total: usize,
    pub recurring: usize,
    pub appointments: usize,
    pub temporary: usize,
    pub active: usize,
    pub pending_collaboration: usize,
}

// ── The engine ─────────────────────────────────────────────────────────────

pub struct ScheduleEngine {
    pub(crate) store: Arc<AgentStore>,
    pub(crate) chat: ChatModel,
    similarity: SimilarityChecker,
}

impl ScheduleEngine {
    pub fn new(store: Arc<AgentStore>, chat: ChatModel) -> Self {
        let similarity = SimilarityChecker::new(chat.clone());
        Self { store, chat, similarity }
    }

    // ── Create ────────────────────────────────────────────────────────

    pub async fn create(&self, params: CreateSchedule) -> EngineResult<ScheduleRow> {
        // 1. Validation.
        if params.end_time <= params.start_time {
            return Err(EngineError::bad_input("end time must be after start time"));
        }
        if params.kind == ScheduleKind::Recurring {
            match params.weekday {
                Some(w) if w <= 6 => {}
                Some(w) => {
                    return Err(EngineError::bad_input(format!("weekday {w} out of range 0..6")))
                }
                None => {
                    return Err(EngineError::bad_input("recurring schedule requires a weekday"))
                }
            }
        }

        let start = format_time(params.start_time);
        let end = format_time(params.end_time);

        // 2. Conflict check with priority dismissal.
        if params.check_conflict {
            let conflicting =
                self.in_range(params.start_time, params.end_time, false, true)?;
            if !conflicting.is_empty() {
                let dismissible = conflicting
                    .iter()
                    .all(|s| params.priority.as_i64() > s.priority);
                if !dismissible {
                    let names: Vec<&str> =
                        conflicting.iter().map(|s| s.title.as_str()).collect();
                    return Err(EngineError::conflict(format!(
                        "overlaps existing schedule(s): {}",
                        names.join(", ")
                    )));
                }
                for loser in &conflicting {
                    info!(
                        "[schedule] '{}' dismissed by higher-priority '{}'",
                        loser.title, params.title
                    );
                    self.store.soft_delete_schedule(&loser.schedule_id)?;
                }
            }
        }

        // 3. Similarity check (never for recurring; failures skip).
        if params.check_similarity && params.kind != ScheduleKind::Recurring {
            let same_day = self.schedules_on_date(params.start_time.date())?;
            match self.similarity.resolve(&params, &same_day).await {
                Some(SimilarityVerdict::KeepExisting { existing_title }) => {
                    return Err(EngineError::conflict(format!(
                        "similar to existing schedule '{existing_title}'"
                    )));
                }
                Some(SimilarityVerdict::KeepNew { existing_id }) => {
                    info!("[schedule] retiring similar peer {existing_id}");
                    self.store.soft_delete_schedule(&existing_id)?;
                }
                None => {}
            }
        }

        // 4. Collaboration flags.
        let mut row = ScheduleRow::new(
            &params.title,
            &params.description,
            params.kind.as_str(),
            &start,
            &end,
            params.priority.as_i64(),
            &params.source,
        );
        row.weekday = params.weekday.map(|w| w as i64);
        row.recurrence_pattern = params.recurrence_pattern.clone();
        row.generated_reason = params.generated_reason.clone();
        row.involves_user = params.involves_user;
        if params.involves_user {
            row.collaboration_status = COLLAB_PENDING.to_string();
            row.is_queryable = false;
        } else {
            row.collaboration_status = COLLAB_NONE.to_string();
            row.is_queryable = true;
        }

        self.store.insert_schedule(&row)?;
        info!("[schedule] created {} '{}' {start}..{end}", row.kind, row.title);
        Ok(row)
    }

    // ── Collaboration ─────────────────────────────────────────────────

    /// Apply the user's answer to a pending collaboration schedule.
    /// Accept: accepted + queryable. Decline: declined + inactive.
    pub fn confirm_collaboration(&self, schedule_id: &str, accept: bool) -> EngineResult<()> {
        let schedule = self
            .store
            .get_schedule(schedule_id)?
            .ok_or_else(|| EngineError::not_found(format!("schedule {schedule_id}")))?;
        if schedule.collaboration_status != COLLAB_PENDING {
            warn!(
                "[schedule] confirm on non-pending schedule '{}' ({})",
                schedule.title, schedule.collaboration_status
            );
        }
        if accept {
            self.store
                .set_schedule_collaboration(schedule_id, COLLAB_ACCEPTED, true, true)
        } else {
            self.store
                .set_schedule_collaboration(schedule_id, COLLAB_DECLINED, false, false)
        }
    }

    pub fn pending_collaboration(&self) -> EngineResult<Vec<ScheduleRow>> {
        self.store.pending_collaboration_schedules()
    }

    // ── Query ─────────────────────────────────────────────────────────

    /// Schedules strictly overlapping [start, end). Recurring schedules are
    /// materialised into concrete occurrences within the range by weekday.
    pub fn in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        queryable_only: bool,
        active_only: bool,
    ) -> EngineResult<Vec<ScheduleRow>> {
        let mut result = self.store.overlapping_schedules(
            &format_time(start),
            &format_time(end),
            queryable_only,
            active_only,
        )?;

        for template in self.store.recurring_schedules(queryable_only, active_only)? {
            let Some(weekday) = template.weekday else { continue };
            let (time_start, time_end) = match (
                parse_time(&template.start_time),
                parse_time(&template.end_time),
            ) {
                (Ok(s), Ok(e)) => (s.time(), e.time()),
                _ => continue,
            };

            let mut day = start.date();
            while day <= end.date() {
                if i64::from(day.weekday().num_days_from_monday()) == weekday {
                    let occ_start = day.and_time(time_start);
                    let occ_end = day.and_time(time_end);
                    if occ_start < end && start < occ_end {
                        let mut occurrence = template.clone();
                        occurrence.start_time = format_time(occ_start);
                        occurrence.end_time = format_time(occ_end);
                        result.push(occurrence);
                    }
                }
                day += Duration::days(1);
            }
        }

        result.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(result)
    }

    /// Active, queryable schedules whose occurrence falls on `date`.
    pub fn schedules_on_date(&self, date: NaiveDate) -> EngineResult<Vec<ScheduleRow>> {
        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        self.in_range(day_start, day_end, true, true)
    }

    /// The day's free time, as [start, end] slots of at least `slot_minutes`.
    /// The day window is 00:00 to 24:00; active queryable schedules
    /// partition it and the complement is returned.
    pub fn free_slots(
        &self,
        date: NaiveDate,
        slot_minutes: i64,
    ) -> EngineResult<Vec<(NaiveDateTime, NaiveDateTime)>> {
        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);

        let mut busy: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
        for schedule in self.in_range(day_start, day_end, true, true)? {
            let (Ok(s), Ok(e)) = (parse_time(&schedule.start_time), parse_time(&schedule.end_time))
            else {
                continue;
            };
            busy.push((s.max(day_start), e.min(day_end)));
        }
        busy.sort();

        // Merge overlapping busy intervals, then take the complement.
        let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
        for (s, e) in busy {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }

        let mut free = Vec::new();
        let mut cursor = day_start;
        for (s, e) in merged {
            if s > cursor {
                free.push((cursor, s));
            }
            cursor = cursor.max(e);
        }
        if cursor < day_end {
            free.push((cursor, day_end));
        }

        free.retain(|(s, e)| (*e - *s).num_minutes() >= slot_minutes);
        Ok(free)
    }

    pub fn get(&self, schedule_id: &str) -> EngineResult<Option<ScheduleRow>> {
        self.store.get_schedule(schedule_id)
    }

    pub fn statistics(&self) -> EngineResult<ScheduleStats> {
        let all = self.store.all_schedules()?;
        let mut stats = ScheduleStats { total: all.len(), ..Default::default() };
        for row in &all {
            match row.kind.as_str() {
                KIND_RECURRING => stats.recurring += 1,
                KIND_APPOINTMENT => stats.appointments += 1,
                KIND_TEMPORARY => stats.temporary += 1,
                _ => {}
            }
            if row.is_active {
                stats.active += 1;
            }
            if row.collaboration_status == COLLAB_PENDING && row.is_active {
                stats.pending_collaboration += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    fn engine() -> ScheduleEngine {
        // Similarity replies "not similar" unless a test overrides the script.
        engine_with(vec![Scripted::Reply(
            "{\"is_similar\": false, \"keep_schedule\": \"none\", \"reason\": \"\"}".into(),
        )])
    }

    fn engine_with(script: Vec<Scripted>) -> ScheduleEngine {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        ScheduleEngine::new(store, chat)
    }

    fn dt(s: &str) -> NaiveDateTime {
        parse_time(s).unwrap()
    }

    fn appointment_at(
        title: &str,
        start: &str,
        end: &str,
        priority: SchedulePriority,
        check_conflict: bool,
    ) -> CreateSchedule {
        let mut p = CreateSchedule::appointment(title, "", dt(start), dt(end), priority);
        p.check_conflict = check_conflict;
        p
    }

    #[tokio::test]
    async fn validation_rejects_bad_times_and_weekdays() {
        let engine = engine();
        let err = engine
            .create(appointment_at(
                "bad",
                "2024-01-15T11:00:00",
                "2024-01-15T10:00:00",
                SchedulePriority::Medium,
                false,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadInput(_)));

        let mut recurring = CreateSchedule::appointment(
            "课程",
            "",
            dt("2024-01-15T09:00:00"),
            dt("2024-01-15T11:00:00"),
            SchedulePriority::Medium,
        );
        recurring.kind = ScheduleKind::Recurring;
        recurring.weekday = None;
        let err = engine.create(recurring.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::BadInput(_)));

        recurring.weekday = Some(7);
        let err = engine.create(recurring).await.unwrap_err();
        assert!(matches!(err, EngineError::BadInput(_)));
    }

    #[tokio::test]
    async fn adjacent_intervals_do_not_conflict() {
        let engine = engine();
        engine
            .create(appointment_at(
                "A",
                "2024-01-15T10:00:00",
                "2024-01-15T11:00:00",
                SchedulePriority::Medium,
                true,
            ))
            .await
            .unwrap();
        // B starts exactly when A ends.
        engine
            .create(appointment_at(
                "B",
                "2024-01-15T11:00:00",
                "2024-01-15T12:00:00",
                SchedulePriority::Medium,
                true,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn equal_priority_conflict_is_refused() {
        let engine = engine();
        engine
            .create(appointment_at(
                "咖啡约会",
                "2024-01-15T10:00:00",
                "2024-01-15T11:00:00",
                SchedulePriority::Medium,
                true,
            ))
            .await
            .unwrap();
        let err = engine
            .create(appointment_at(
                "撞车",
                "2024-01-15T10:30:00",
                "2024-01-15T11:30:00",
                SchedulePriority::Medium,
                true,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn higher_priority_dismisses_conflicts() {
        let engine = engine();
        let coffee = engine
            .create(appointment_at(
                "咖啡约会",
                "2024-01-15T10:00:00",
                "2024-01-15T11:00:00",
                SchedulePriority::Medium,
                true,
            ))
            .await
            .unwrap();
        let call = engine
            .create(appointment_at(
                "客户紧急电话",
                "2024-01-15T10:30:00",
                "2024-01-15T11:00:00",
                SchedulePriority::High,
                true,
            ))
            .await
            .unwrap();

        let old = engine.get(&coffee.schedule_id).unwrap().unwrap();
        assert!(!old.is_active, "dismissed schedule must be inactive");
        let new = engine.get(&call.schedule_id).unwrap().unwrap();
        assert!(new.is_active);
    }

    #[tokio::test]
    async fn created_schedule_is_found_in_its_own_range() {
        let engine = engine();
        let row = engine
            .create(appointment_at(
                "会议",
                "2024-01-15T14:00:00",
                "2024-01-15T15:00:00",
                SchedulePriority::Medium,
                false,
            ))
            .await
            .unwrap();
        let hits = engine
            .in_range(dt("2024-01-15T14:00:00"), dt("2024-01-15T15:00:00"), true, true)
            .unwrap();
        assert!(hits.iter().any(|s| s.schedule_id == row.schedule_id));
    }

    #[tokio::test]
    async fn recurring_materialises_on_matching_weekday() {
        let engine = engine();
        // 2024-01-15 is a Monday (weekday 0).
        let mut course = CreateSchedule::appointment(
            "英语课",
            "每周一的英语课",
            dt("2024-01-15T09:00:00"),
            dt("2024-01-15T11:00:00"),
            SchedulePriority::Medium,
        );
        course.kind = ScheduleKind::Recurring;
        course.weekday = Some(0);
        course.recurrence_pattern = Some("每周一".into());
        engine.create(course).await.unwrap();

        // The following Monday.
        let hits = engine
            .in_range(dt("2024-01-22T00:00:00"), dt("2024-01-23T00:00:00"), true, true)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start_time, "2024-01-22T09:00:00");

        // A Tuesday: nothing.
        let hits = engine
            .in_range(dt("2024-01-23T00:00:00"), dt("2024-01-24T00:00:00"), true, true)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn involves_user_starts_pending_and_hidden() {
        let engine = engine();
        let mut params = appointment_at(
            "一起看电影",
            "2024-01-15T19:00:00",
            "2024-01-15T21:00:00",
            SchedulePriority::Low,
            false,
        );
        params.involves_user = true;
        let row = engine.create(params).await.unwrap();
        assert_eq!(row.collaboration_status, COLLAB_PENDING);
        assert!(!row.is_queryable);

        // Hidden from queryable range queries until accepted.
        let visible = engine
            .in_range(dt("2024-01-15T00:00:00"), dt("2024-01-16T00:00:00"), true, true)
            .unwrap();
        assert!(visible.is_empty());

        engine.confirm_collaboration(&row.schedule_id, true).unwrap();
        let visible = engine
            .in_range(dt("2024-01-15T00:00:00"), dt("2024-01-16T00:00:00"), true, true)
            .unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[tokio::test]
    async fn declined_collaboration_deactivates() {
        let engine = engine();
        let mut params = appointment_at(
            "一起跑步",
            "2024-01-15T07:00:00",
            "2024-01-15T08:00:00",
            SchedulePriority::Low,
            false,
        );
        params.involves_user = true;
        let row = engine.create(params).await.unwrap();
        engine.confirm_collaboration(&row.schedule_id, false).unwrap();

        let fetched = engine.get(&row.schedule_id).unwrap().unwrap();
        assert_eq!(fetched.collaboration_status, COLLAB_DECLINED);
        assert!(!fetched.is_active);
    }

    #[tokio::test]
    async fn free_slots_complement_the_day() {
        let engine = engine();
        engine
            .create(appointment_at(
                "会议",
                "2024-01-15T14:00:00",
                "2024-01-15T15:00:00",
                SchedulePriority::Medium,
                false,
            ))
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let slots = engine.free_slots(date, 60).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, dt("2024-01-15T00:00:00"));
        assert_eq!(slots[0].1, dt("2024-01-15T14:00:00"));
        assert_eq!(slots[1].0, dt("2024-01-15T15:00:00"));
        assert_eq!(slots[1].1, dt("2024-01-16T00:00:00"));
        for (s, e) in &slots {
            assert!((*e - *s).num_minutes() >= 60);
        }
    }

    #[tokio::test]
    async fn similarity_keep_existing_refuses_creation() {
        let engine = engine_with(vec![
            // First create: no peers, similarity never asked. Second create:
            // one comparison answering keep_existing.
            Scripted::Reply(
                "{\"is_similar\": true, \"keep_schedule\": \"existing\", \"reason\": \"同一活动\"}"
                    .into(),
            ),
        ]);
        let mut first = appointment_at(
            "看电影",
            "2024-01-15T19:00:00",
            "2024-01-15T21:00:00",
            SchedulePriority::Low,
            false,
        );
        first.check_similarity = true;
        engine.create(first).await.unwrap();

        let mut second = appointment_at(
            "电影之夜",
            "2024-01-15T20:00:00",
            "2024-01-15T22:00:00",
            SchedulePriority::Low,
            false,
        );
        second.check_similarity = true;
        let err = engine.create(second).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn similarity_keep_new_retires_peer() {
        let engine = engine_with(vec![Scripted::Reply(
            "{\"is_similar\": true, \"keep_schedule\": \"new\", \"reason\": \"新日程更详细\"}".into(),
        )]);
        let mut first = appointment_at(
            "看电影",
            "2024-01-15T19:00:00",
            "2024-01-15T21:00:00",
            SchedulePriority::Low,
            false,
        );
        first.check_similarity = true;
        let first_row = engine.create(first).await.unwrap();

        let mut second = appointment_at(
            "和朋友一起看电影《流浪地球》",
            "2024-01-15T20:00:00",
            "2024-01-15T22:00:00",
            SchedulePriority::Low,
            false,
        );
        second.check_similarity = true;
        let second_row = engine.create(second).await.unwrap();

        assert!(!engine.get(&first_row.schedule_id).unwrap().unwrap().is_active);
        assert!(engine.get(&second_row.schedule_id).unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn similarity_service_failure_skips_check() {
        let engine = engine_with(vec![Scripted::Fail("offline".into())]);
        let mut first = appointment_at(
            "看电影",
            "2024-01-15T19:00:00",
            "2024-01-15T21:00:00",
            SchedulePriority::Low,
            false,
        );
        first.check_similarity = true;
        engine.create(first).await.unwrap();

        let mut second = appointment_at(
            "电影之夜",
            "2024-01-15T20:00:00",
            "2024-01-15T22:00:00",
            SchedulePriority::Low,
            false,
        );
        second.check_similarity = true;
        // Creation proceeds despite the unreachable similarity service.
        engine.create(second).await.unwrap();
    }
}
