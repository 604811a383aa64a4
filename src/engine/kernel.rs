// Eidolon Engine — Agent Kernel
// The per-turn pipeline behind `chat(user_input) → reply`:
//
//   1. understand  — knowledge retrieval + environment-switch intent
//   2. vision      — perception-triggered environment context
//   3. schedule    — collaboration confirmation, intent, create/query
//   4. plugins     — optional context from registered plugins
//   5. remember    — append the user message (extraction/archival/emotion/
//                    expression learning fire off their own round counters)
//   6. compose     — system prompt + optional context blocks + history
//   7. generate    — Main-tier reply
//   8. remember    — append the assistant message
//
// The whole turn runs under one deadline. A hard upstream failure on the
// final generation still yields a reply (an apology carrying the upstream
// message) and the user message stays in memory.
//
// `handle_event(id)` is the second entry point: notification events get one
// Main-tier explanation; task events run through the task graph.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::config::{CharacterProfile, EngineSettings};
use crate::engine::emotion::EmotionAnalyzer;
use crate::engine::events::{EventKind, EventManager};
use crate::engine::expression::ExpressionStyleManager;
use crate::engine::intent::{ScheduleIntentTool, ScheduleIntent};
use crate::engine::knowledge::{KnowledgeGraph, RetrievedKnowledge};
use crate::engine::memory::LayeredMemory;
use crate::engine::plugins::{PluginInvoker, PluginRegistry};
use crate::engine::prompts::PromptLibrary;
use crate::engine::providers::ChatModel;
use crate::engine::schedule::{parse_time, CreateSchedule, ScheduleEngine, SchedulePriority};
use crate::engine::store::{AgentStore, EventRow, KIND_TEMPORARY};
use crate::engine::taskgraph::{StoreCheckpointer, TaskEventSnapshot, TaskGraphEngine};
use crate::engine::world::EnvironmentModel;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const HISTORY_IN_PROMPT: usize = 10;
const RECENT_CONTEXT_MESSAGES: usize = 5;

const NEGATIVE_KEYWORDS: &[&str] = &["不行", "不要", "不用", "不去", "算了", "拒绝", "no"];
const POSITIVE_KEYWORDS: &[&str] = &["好", "可以", "行", "同意", "确认", "ok", "yes"];

pub struct AgentKernel {
    store: Arc<AgentStore>,
    chat: ChatModel,
    prompts: PromptLibrary,
    profile: CharacterProfile,
    settings: EngineSettings,
    knowledge: Arc<KnowledgeGraph>,
    memory: LayeredMemory,
    emotion: EmotionAnalyzer,
    world: EnvironmentModel,
    schedule: ScheduleEngine,
    schedule_intent: ScheduleIntentTool,
    expression: ExpressionStyleManager,
    plugins: PluginInvoker,
    taskgraph: TaskGraphEngine,
    events: EventManager,
}

/// What the schedule phase of a turn produced.
#[derive(Default)]
struct ScheduleTurn {
    context: Option<String>,
    action_note: Option<String>,
}

impl AgentKernel {
    pub fn new(
        store: Arc<AgentStore>,
        chat: ChatModel,
        prompts: PromptLibrary,
        plugin_registry: PluginRegistry,
        profile: CharacterProfile,
        settings: EngineSettings,
    ) -> Self {
        let knowledge = Arc::new(KnowledgeGraph::new(store.clone(), chat.clone()));
        let memory = LayeredMemory::new(
            store.clone(),
            chat.clone(),
            knowledge.clone(),
            settings.clone(),
        );
        let emotion = EmotionAnalyzer::new(store.clone(), chat.clone(), settings.clone());
        let world = EnvironmentModel::new(store.clone(), chat.clone());
        let schedule = ScheduleEngine::new(store.clone(), chat.clone());
        let schedule_intent = ScheduleIntentTool::new(chat.clone());
        let expression =
            ExpressionStyleManager::new(store.clone(), chat.clone(), settings.clone());
        let plugins = PluginInvoker::new(plugin_registry, chat.clone());
        let taskgraph = TaskGraphEngine::new(
            chat.clone(),
            Arc::new(StoreCheckpointer::new(store.clone())),
        );
        let events = EventManager::new(store.clone());

        Self {
            store,
            chat,
            prompts,
            profile,
            settings,
            knowledge,
            memory,
            emotion,
            world,
            schedule,
            schedule_intent,
            expression,
            plugins,
            taskgraph,
            events,
        }
    }

    // ── Component access for hosts ────────────────────────────────────

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }
    pub fn knowledge(&self) -> &KnowledgeGraph {
        &self.knowledge
    }
    pub fn memory(&self) -> &LayeredMemory {
        &self.memory
    }
    pub fn emotion(&self) -> &EmotionAnalyzer {
        &self.emotion
    }
    pub fn world(&self) -> &EnvironmentModel {
        &self.world
    }
    pub fn schedule(&self) -> &ScheduleEngine {
        &self.schedule
    }
    pub fn expression(&self) -> &ExpressionStyleManager {
        &self.expression
    }
    pub fn events(&self) -> &EventManager {
        &self.events
    }
    pub fn profile(&self) -> &CharacterProfile {
        &self.profile
    }

    // ── Chat entry points ─────────────────────────────────────────────

    /// One chat turn under the configured deadline.
    pub async fn chat(&self, user_input: &str) -> EngineResult<String> {
        self.chat_with_deadline(user_input, self.settings.turn_timeout).await
    }

    /// One chat turn under an explicit deadline.
    pub async fn chat_with_deadline(
        &self,
        user_input: &str,
        deadline: Duration,
    ) -> EngineResult<String> {
        match tokio::time::timeout(deadline, self.chat_turn(user_input)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Cancelled(format!(
                "chat turn exceeded {}s deadline",
                deadline.as_secs()
            ))),
        }
    }

    async fn chat_turn(&self, user_input: &str) -> EngineResult<String> {
        info!("[kernel] turn start ({} chars)", user_input.len());

        // 1. Understand: knowledge + environment switching.
        let retrieved = self.knowledge.retrieve(user_input).await?;
        if let Some(intent) = self.world.detect_switch_intent(user_input).await? {
            if intent.can_switch {
                match self.world.switch(&intent.to_env.uuid) {
                    Ok(env) => {
                        let from = intent
                            .from_env
                            .as_ref()
                            .map(|e| e.name.clone())
                            .unwrap_or_else(|| "未知位置".to_string());
                        let note =
                            format!("【环境切换】已从「{from}」移动到「{}」", env.name);
                        self.memory.add_message("system", &note).await?;
                    }
                    Err(e) => warn!("[kernel] environment switch failed: {e}"),
                }
            }
        }

        // 2. Vision.
        let vision = self.world.vision_context(user_input).await?;

        // 3. Schedule.
        let schedule_turn = self.schedule_phase(user_input).await?;

        // 4. Plugins.
        let plugin_result = self.plugins.invoke_relevant(user_input).await;

        // 5. Remember the user message; round-counter triggers fire inside.
        self.memory.add_message("user", user_input).await?;
        let rounds = self.memory.total_conversations()?;
        let character_sheet =
            self.prompts.character_prompt(Some(&self.profile.name), &self.profile.as_vars());
        self.emotion.maybe_analyze(rounds, &character_sheet).await;
        self.expression.maybe_learn(rounds).await;

        // 6. Compose the message list.
        let mut messages = self
            .compose_messages(&retrieved, &schedule_turn, vision.as_ref(), &plugin_result)
            .await?;
        for msg in self.memory.recent_messages(HISTORY_IN_PROMPT)? {
            messages.push(ChatMessage { role: msg.role, content: msg.content });
        }

        // 7. Generate. A hard upstream failure still produces a reply.
        let reply = match self.chat.chat(&messages, ModelTier::Main).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[kernel] reply generation failed: {e}");
                format!("抱歉，处理请求时出现错误: {e}")
            }
        };

        // 8. Remember the reply.
        self.memory.add_message("assistant", &reply).await?;
        info!("[kernel] turn complete ({} chars)", reply.len());
        Ok(reply)
    }

    // ── Schedule phase ────────────────────────────────────────────────

    async fn schedule_phase(&self, user_input: &str) -> EngineResult<ScheduleTurn> {
        let mut turn = ScheduleTurn::default();
        let now = chrono::Local::now().naive_local();

        // 3.1 A pending collaboration schedule + a confirmation-looking
        // message: apply the answer to the most recent pending entry.
        let pending = self.schedule.pending_collaboration()?;
        if let Some(last_pending) = pending.first() {
            let lower = user_input.to_lowercase();
            let negative = NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k));
            let positive = !negative && POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k));
            if positive || negative {
                self.schedule
                    .confirm_collaboration(&last_pending.schedule_id, positive)?;
                turn.action_note = Some(if positive {
                    format!("已确认日程：{}", last_pending.title)
                } else {
                    format!("已取消日程：{}", last_pending.title)
                });
            }
        }

        // 3.2 Intent classification: create an appointment or answer a query.
        let context = self.recent_context()?;
        let intent = self
            .schedule_intent
            .recognize(user_input, &self.profile.name, &context, now)
            .await;

        if intent.is_appointment() {
            self.handle_appointment_intent(&intent, &mut turn).await;
        } else if intent.is_query() {
            self.handle_query_intent(&intent, now, &context, &mut turn).await?;
        }

        Ok(turn)
    }

    async fn handle_appointment_intent(&self, intent: &ScheduleIntent, turn: &mut ScheduleTurn) {
        let (Some(start_raw), Some(end_raw)) = (&intent.start_time, &intent.end_time) else {
            return;
        };
        let (Ok(start), Ok(end)) = (parse_time(start_raw), parse_time(end_raw)) else {
            warn!("[kernel] appointment intent carried unparsable times");
            return;
        };

        let title = if intent.title.is_empty() { "未命名活动" } else { &intent.title };
        let mut params = CreateSchedule::appointment(
            title,
            &intent.description,
            start,
            end,
            SchedulePriority::Medium,
        );
        params.source = "intent".to_string();
        params.check_conflict = true;
        params.check_similarity = true;

        match self.schedule.create(params).await {
            Ok(row) => {
                turn.action_note = Some(format!("已创建日程：{}", row.title));
                turn.context = Some(format!(
                    "已同意该日程安排：{}，时间为{}至{}",
                    row.title, row.start_time, row.end_time
                ));
            }
            Err(e) => {
                // Creation failures surface as a note and are not retried.
                turn.action_note = Some(format!("日程创建失败：{e}"));
                turn.context = Some(format!("由于{e}，无法创建该日程"));
            }
        }
    }

    async fn handle_query_intent(
        &self,
        intent: &ScheduleIntent,
        now: NaiveDateTime,
        context: &str,
        turn: &mut ScheduleTurn,
    ) -> EngineResult<()> {
        let query_date = intent
            .start_time
            .as_deref()
            .and_then(|t| parse_time(t).ok())
            .map(|t| t.date())
            .unwrap_or_else(|| now.date());

        let date_desc = describe_date(query_date, now.date());

        // Generate temporaries when the day has none.
        let day_start = query_date.and_time(NaiveTime::MIN);
        let day_end = day_start + ChronoDuration::days(1);
        let existing = self.schedule.in_range(day_start, day_end, false, true)?;
        let has_temporary = existing.iter().any(|s| s.kind == KIND_TEMPORARY);
        if !has_temporary {
            info!("[kernel] no temporary schedules on {query_date}, generating");
            if let Err(e) = self
                .schedule
                .generate_temporary_schedules(
                    query_date,
                    &self.profile.name,
                    &self.profile.personality,
                    &self.profile.hobby,
                    context,
                )
                .await
            {
                warn!("[kernel] temporary generation failed: {e}");
            }
        }

        let visible = self.schedule.schedules_on_date(query_date)?;
        turn.context = Some(if visible.is_empty() {
            format!("我{date_desc}没有特别的日程安排，比较空闲")
        } else {
            let lines: Vec<String> = visible
                .iter()
                .map(|s| {
                    let start = parse_time(&s.start_time)
                        .map(|t| t.format("%H:%M").to_string())
                        .unwrap_or_else(|_| s.start_time.clone());
                    format!("{start} - {}", s.title)
                })
                .collect();
            format!("我{date_desc}的日程安排：\n{}", lines.join("\n"))
        });
        Ok(())
    }

    // ── Prompt composition ────────────────────────────────────────────

    async fn compose_messages(
        &self,
        retrieved: &RetrievedKnowledge,
        schedule_turn: &ScheduleTurn,
        vision: Option<&crate::engine::world::VisionContext>,
        plugin_result: &crate::engine::plugins::PluginContextResult,
    ) -> EngineResult<Vec<ChatMessage>> {
        let long_term = self.memory.context_for_chat()?;
        let emotion_summary = self
            .emotion
            .latest()?
            .map(|s| format!("{}（{}）", s.relationship_type, s.emotional_tone))
            .unwrap_or_else(|| "初次见面".to_string());
        let knowledge_summary = if retrieved.entities.is_empty() {
            "无相关知识".to_string()
        } else {
            format!("识别到主体：{}", retrieved.entities.join(", "))
        };
        let environment_summary = self
            .world
            .active_environment()?
            .map(|e| e.name)
            .unwrap_or_else(|| "无环境信息".to_string());

        let character_sheet =
            self.prompts.character_prompt(Some(&self.profile.name), &self.profile.as_vars());
        let world_setting = self.prompts.worldview_prompt(&HashMap::new());

        let mut slots: HashMap<String, String> = HashMap::new();
        slots.insert("character_name".into(), self.profile.name.clone());
        slots.insert("character_profile".into(), character_sheet.clone());
        slots.insert("world_setting".into(), world_setting.clone());
        slots.insert(
            "long_term_memory".into(),
            if long_term.is_empty() { "无长期记忆".into() } else { long_term.clone() },
        );
        slots.insert("relevant_knowledge".into(), knowledge_summary);
        slots.insert("environment_context".into(), environment_summary);
        slots.insert("emotion_relationship".into(), emotion_summary);

        let system_prompt = match self.prompts.system_prompt("chat_system", &slots) {
            Ok(text) => text,
            Err(_) => self.fallback_system_prompt(&character_sheet, &world_setting),
        };

        let mut messages = vec![ChatMessage::system(system_prompt)];

        let mut push_block = |block: String| {
            if !block.is_empty() {
                messages.push(ChatMessage::system(block));
            }
        };

        push_block(self.emotion.tone_prompt_block()?);
        push_block(self.expression.agent_expression_block()?);
        push_block(self.expression.user_expression_block()?);
        push_block(KnowledgeGraph::context_block(retrieved));
        if let Some(ctx) = vision {
            push_block(EnvironmentModel::vision_prompt_block(ctx));
        }
        if let Some(schedule_context) = &schedule_turn.context {
            push_block(format!("【日程信息】\n{schedule_context}"));
        }
        if let Some(action) = &schedule_turn.action_note {
            push_block(format!("【日程操作】{action}"));
        }
        if plugin_result.has_context() {
            push_block(PluginInvoker::format_prompt_block(&plugin_result.context_info));
        }
        push_block(self.memory.context_for_chat()?);

        Ok(messages)
    }

    /// Assembled fallback when no chat_system template exists: the
    /// character sheet plus the instant-messaging style rules.
    fn fallback_system_prompt(&self, character_sheet: &str, world_setting: &str) -> String {
        let mut parts = vec![format!(
            "你是{}，正在和用户通过即时通信软件聊天。",
            self.profile.name
        )];
        parts.push(character_sheet.to_string());
        if !world_setting.is_empty() {
            parts.push(format!("【世界观】\n{world_setting}"));
        }
        parts.push(
            "【聊天风格要求】\n\
             1. 完全融入角色，用第一人称\"我\"说话\n\
             2. 回复要简短自然，像真人发消息一样\n\
             3. 避免列表、序号等格式化内容\n\
             4. 一次只聊一个话题\n\
             5. 记住之前聊过的内容，保持对话连贯\n\n\
             【输出限制】\n只输出发言内容，不要输出多余的前后缀、括号或说明。"
                .to_string(),
        );
        parts.join("\n\n")
    }

    fn recent_context(&self) -> EngineResult<String> {
        let recent = self.memory.recent_messages(RECENT_CONTEXT_MESSAGES)?;
        Ok(recent
            .iter()
            .map(|m| {
                let who = if m.role == "user" { "用户" } else { "角色" };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    // ── Event handling ────────────────────────────────────────────────

    /// Dispatch an event by id: notification events get one explanation
    /// call; task events run the task graph.
    pub async fn handle_event(&self, event_id: &str) -> EngineResult<String> {
        let event = self.events.get(event_id)?;
        match EventKind::parse(&event.kind) {
            Some(EventKind::Notification) => self.process_notification(&event).await,
            Some(EventKind::Task) => self.process_task(&event).await,
            None => Err(EngineError::bad_input(format!("unknown event kind '{}'", event.kind))),
        }
    }

    async fn process_notification(&self, event: &EventRow) -> EngineResult<String> {
        self.events.mark_processing(&event.event_id, "智能体开始理解事件")?;

        let character_sheet =
            self.prompts.character_prompt(Some(&self.profile.name), &self.profile.as_vars());
        let system = self.fallback_system_prompt(&character_sheet, "");
        let prompt = format!(
            "【收到新的通知事件】\n\n事件标题：{}\n事件描述：{}\n\n\
             请你作为{}，立即理解这个事件的含义，并用自然的语气向用户说明这个事件。\n\
             说明要包括：\n1. 事件的核心内容\n2. 可能的影响或重要性\n3. 如有必要，你的看法或建议\n\n\
             请保持你的角色人设，用符合你性格的方式表达。",
            event.title, event.description, self.profile.name
        );

        let explanation = match self
            .chat
            .chat(&[ChatMessage::system(system), ChatMessage::user(prompt)], ModelTier::Main)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                self.events.mark_failed(&event.event_id, &format!("说明失败: {e}"))?;
                return Err(e);
            }
        };

        self.events
            .append_log(&event.event_id, "notification_explained", &explanation)?;
        self.events.mark_completed(&event.event_id, "通知事件已说明")?;
        Ok(format!("【通知事件】{}\n\n{explanation}", event.title))
    }

    async fn process_task(&self, event: &EventRow) -> EngineResult<String> {
        self.events.mark_processing(&event.event_id, "智能体开始处理任务")?;

        let snapshot = TaskEventSnapshot {
            event_id: event.event_id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            requirements: event.metadata["task_requirements"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            criteria: event.metadata["completion_criteria"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };
        let character_context = serde_json::json!(self.profile.as_vars());

        let report = match self
            .taskgraph
            .run(&event.event_id, snapshot, character_context)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                self.events.mark_failed(&event.event_id, &format!("任务执行失败: {e}"))?;
                return Err(e);
            }
        };

        // Persist the collaboration trail alongside the event.
        self.events.merge_metadata(
            &event.event_id,
            serde_json::json!({"collaboration_logs": report.collaboration_logs}),
        )?;
        self.events.append_log(
            &event.event_id,
            "task_processed",
            &format!(
                "成功智能体: {}, 失败: {}",
                report.successful_agents, report.failed_agents
            ),
        )?;

        if report.success {
            self.events
                .mark_completed(&event.event_id, "任务执行完成，结果已提交给用户")?;
        } else {
            // Failed only when no agent succeeded.
            self.events.mark_failed(&event.event_id, "所有智能体执行失败")?;
        }

        Ok(report.result)
    }
}

fn describe_date(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "今天".to_string()
    } else if date == today + ChronoDuration::days(1) {
        "明天".to_string()
    } else {
        date.format("%m月%d日").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_descriptions() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(describe_date(today, today), "今天");
        assert_eq!(describe_date(today + ChronoDuration::days(1), today), "明天");
        assert_eq!(describe_date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(), today), "02月03日");
    }

    #[test]
    fn confirmation_keyword_polarity() {
        // Negative phrasing must not read as positive even though "行"
        // appears inside "不行".
        let lower = "下周不行哦".to_lowercase();
        let negative = NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k));
        let positive = !negative && POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k));
        assert!(negative);
        assert!(!positive);
    }
}
