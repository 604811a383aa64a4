// Temporary schedule generation: when a queried day has no temporary
// schedules, propose 1–3 filler activities that fit the character's
// personality and hobbies, placed into the day's free slots. If the Tool
// model is unavailable or answers garbage, fall back to one deterministic
// activity in the first slot chosen by hour band.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::store::ScheduleRow;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use log::{info, warn};
use serde::Deserialize;

use super::{CreateSchedule, ScheduleEngine, ScheduleKind, SchedulePriority};

const MAX_GENERATED: usize = 3;

#[derive(Debug, Deserialize)]
struct Suggestion {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    time_slot_index: usize,
    #[serde(default = "default_duration")]
    duration_hours: f64,
    #[serde(default)]
    involves_user: bool,
    #[serde(default)]
    reason: String,
}

fn default_duration() -> f64 {
    1.0
}

/// Time-of-day band for an hour (0–23).
pub fn hour_band(hour: u32) -> &'static str {
    match hour {
        5..=8 => "早晨",
        9..=11 => "上午",
        12..=13 => "中午",
        14..=17 => "下午",
        18..=21 => "晚上",
        _ => "深夜",
    }
}

impl ScheduleEngine {
    /// Generate 1–3 temporary schedules for `date`. Returns the created rows
    /// (possibly empty when the day has no usable free slots).
    pub async fn generate_temporary_schedules(
        &self,
        date: NaiveDate,
        character_name: &str,
        personality: &str,
        hobby: &str,
        context: &str,
    ) -> EngineResult<Vec<ScheduleRow>> {
        let free_slots = self.free_slots(date, 60)?;
        if free_slots.is_empty() {
            info!("[schedule] no free slots on {date}, nothing to generate");
            return Ok(Vec::new());
        }

        let suggestions = self
            .suggest(&free_slots, character_name, personality, hobby, context)
            .await;

        let mut created = Vec::new();
        match suggestions {
            Some(list) => {
                for suggestion in list.into_iter().take(MAX_GENERATED) {
                    let Some(&(slot_start, slot_end)) =
                        free_slots.get(suggestion.time_slot_index)
                    else {
                        continue;
                    };
                    let duration_mins = (suggestion.duration_hours * 60.0) as i64;
                    let end = (slot_start + Duration::minutes(duration_mins.max(30))).min(slot_end);

                    match self
                        .create_generated(
                            &suggestion.title,
                            &suggestion.description,
                            slot_start,
                            end,
                            &suggestion.reason,
                            suggestion.involves_user,
                        )
                        .await
                    {
                        Ok(row) => created.push(row),
                        Err(e) => warn!("[schedule] generated entry refused: {e}"),
                    }
                }
            }
            None => {
                // Deterministic fallback: one activity in the first slot.
                let (slot_start, slot_end) = free_slots[0];
                let end = (slot_start + Duration::minutes(90)).min(slot_end);
                let (title, description) = fallback_activity(slot_start.hour());
                if let Ok(row) = self
                    .create_generated(title, description, slot_start, end, "自动生成的临时日程", false)
                    .await
                {
                    created.push(row);
                }
            }
        }

        info!("[schedule] generated {} temporary schedules for {date}", created.len());
        Ok(created)
    }

    async fn create_generated(
        &self,
        title: &str,
        description: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: &str,
        involves_user: bool,
    ) -> EngineResult<ScheduleRow> {
        let mut params = CreateSchedule::appointment(
            title,
            description,
            start,
            end,
            SchedulePriority::Low,
        );
        params.kind = ScheduleKind::Temporary;
        params.generated_reason = Some(reason.to_string());
        params.involves_user = involves_user;
        params.source = "generated".to_string();
        self.create(params).await
    }

    async fn suggest(
        &self,
        free_slots: &[(NaiveDateTime, NaiveDateTime)],
        character_name: &str,
        personality: &str,
        hobby: &str,
        context: &str,
    ) -> Option<Vec<Suggestion>> {
        let system = format!(
            "你是一个日程规划助手，帮助{character_name}规划临时日程。\n\n\
             {character_name}的信息：\n- 性格：{personality}\n- 爱好：{hobby}\n\n\
             任务：根据提供的空闲时间段，生成1-3个合理的临时日程建议。\n\
             要求：\n\
             1. 日程内容应符合{character_name}的性格和爱好\n\
             2. 日程应该多样化，包括学习、娱乐、休息等\n\
             3. 考虑时间段的特点（如早上适合学习，晚上适合放松）\n\
             4. 涉及用户参与的日程标注involves_user=true\n\n\
             请以JSON数组输出（只返回JSON）：\n\
             [{{\"title\": \"日程标题\", \"description\": \"详细描述\", \
             \"time_slot_index\": 0, \"duration_hours\": 1.5, \
             \"involves_user\": false, \"reason\": \"选择原因\"}}]\n\n\
             time_slot_index 指使用第几个空闲时间段（从0开始）。"
        );

        let slots_text: String = free_slots
            .iter()
            .enumerate()
            .map(|(i, (s, e))| {
                let hours = (*e - *s).num_minutes() as f64 / 60.0;
                format!(
                    "时间段{i}: {}-{} ({}, {:.1}小时)\n",
                    s.format("%H:%M"),
                    e.format("%H:%M"),
                    hour_band(s.hour()),
                    hours
                )
            })
            .collect();

        let user = format!(
            "可用的空闲时间段：\n{slots_text}\n{}请为{character_name}生成1-3个临时日程建议。",
            if context.is_empty() { String::new() } else { format!("对话上下文：{context}\n\n") }
        );

        let request = [ChatMessage::system(system), ChatMessage::user(user)];
        match self.chat.chat(&request, ModelTier::Tool).await {
            Ok(reply) => match llm_json::parse_strict::<Vec<Suggestion>>(&reply) {
                Ok(list) if !list.is_empty() => Some(list),
                Ok(_) => None,
                Err(e) => {
                    warn!("[schedule] suggestion reply unparsable, using fallback: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("[schedule] suggestion call failed, using fallback: {e}");
                None
            }
        }
    }
}

/// Hour-band fallback activity used when the model gives no usable answer.
fn fallback_activity(hour: u32) -> (&'static str, &'static str) {
    match hour {
        9..=11 => ("阅读时光", "安静地阅读一本喜欢的书"),
        14..=17 => ("学习充电", "学习新知识，充实自己"),
        _ => ("休闲放松", "放松心情，做些喜欢的事"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};
    use crate::engine::store::{AgentStore, KIND_TEMPORARY};
    use std::sync::Arc;

    fn engine_with(script: Vec<Scripted>) -> ScheduleEngine {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        ScheduleEngine::new(store, chat)
    }

    #[test]
    fn hour_bands_cover_the_day() {
        assert_eq!(hour_band(6), "早晨");
        assert_eq!(hour_band(10), "上午");
        assert_eq!(hour_band(12), "中午");
        assert_eq!(hour_band(15), "下午");
        assert_eq!(hour_band(19), "晚上");
        assert_eq!(hour_band(23), "深夜");
        assert_eq!(hour_band(2), "深夜");
    }

    #[tokio::test]
    async fn generates_from_llm_suggestions() {
        let engine = engine_with(vec![Scripted::Reply(
            r#"[{"title": "练习书法", "description": "临摹字帖", "time_slot_index": 0,
                 "duration_hours": 1.0, "involves_user": false, "reason": "符合爱好"},
                {"title": "一起看电影", "description": "晚上看部电影", "time_slot_index": 0,
                 "duration_hours": 2.0, "involves_user": true, "reason": "放松"}]"#
                .into(),
        )]);
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let created = engine
            .generate_temporary_schedules(date, "小可", "活泼开朗", "历史", "")
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|s| s.kind == KIND_TEMPORARY));
        assert!(created.iter().all(|s| s.generated_reason.is_some()));
        // The user-involving one starts as pending collaboration.
        let pending = engine.pending_collaboration().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "一起看电影");
    }

    #[tokio::test]
    async fn llm_failure_creates_single_fallback_entry() {
        let engine = engine_with(vec![Scripted::Fail("offline".into())]);
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let created = engine
            .generate_temporary_schedules(date, "小可", "活泼开朗", "历史", "")
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, KIND_TEMPORARY);
        assert_eq!(created[0].generated_reason.as_deref(), Some("自动生成的临时日程"));
    }
}
