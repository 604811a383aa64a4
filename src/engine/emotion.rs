// Eidolon Engine — Emotion & Relationship Analyzer
// Periodically reads the recent conversation and produces an append-only
// snapshot of the relationship: type, tone, an overall score and five
// dimensions (intimacy, trust, pleasure, resonance, dependence), each 0–100.
//
// Trigger policy (driven by the round counter in store metadata):
//   • first analysis once total rounds ≥ emotion_first_rounds and no
//     analysis has run yet;
//   • afterwards, every emotion_interval_rounds user turns.
// A failed analysis is logged and skipped without advancing the counter, so
// it retries on the next eligible turn.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::config::EngineSettings;
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::{AgentStore, EmotionSnapshotRow};
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

pub const LAST_EMOTION_ROUNDS_KEY: &str = "last_emotion_rounds";
const ANALYSIS_MESSAGE_WINDOW: usize = 30;

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    relationship_type: String,
    emotional_tone: String,
    overall_score: i64,
    #[serde(default)]
    intimacy: i64,
    #[serde(default)]
    trust: i64,
    #[serde(default)]
    pleasure: i64,
    #[serde(default)]
    resonance: i64,
    #[serde(default)]
    dependence: i64,
    #[serde(default)]
    analysis_summary: String,
}

pub struct EmotionAnalyzer {
    store: Arc<AgentStore>,
    chat: ChatModel,
    settings: EngineSettings,
}

impl EmotionAnalyzer {
    pub fn new(store: Arc<AgentStore>, chat: ChatModel, settings: EngineSettings) -> Self {
        Self { store, chat, settings }
    }

    /// Whether the trigger policy fires at `current_rounds`.
    pub fn should_analyze(&self, current_rounds: u64) -> EngineResult<bool> {
        let last = self.store.get_counter(LAST_EMOTION_ROUNDS_KEY)?;
        if last == 0 {
            return Ok(current_rounds >= self.settings.emotion_first_rounds);
        }
        Ok(current_rounds >= last + self.settings.emotion_interval_rounds)
    }

    /// Run the trigger check and, when due, the analysis itself.
    /// Failures are swallowed (logged) so the chat turn continues; the
    /// counter only advances on success.
    pub async fn maybe_analyze(&self, current_rounds: u64, character_profile: &str) {
        match self.should_analyze(current_rounds) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("[emotion] trigger check failed: {e}");
                return;
            }
        }

        match self.analyze(character_profile).await {
            Ok(snapshot) => {
                if let Err(e) = self.store.set_counter(LAST_EMOTION_ROUNDS_KEY, current_rounds) {
                    warn!("[emotion] failed to persist analysis round: {e}");
                }
                info!(
                    "[emotion] snapshot at round {current_rounds}: {} / {} ({})",
                    snapshot.relationship_type, snapshot.emotional_tone, snapshot.overall_score
                );
            }
            Err(e) => warn!("[emotion] analysis failed, will retry next eligible turn: {e}"),
        }
    }

    /// One analysis over the last ≤30 messages. Returns the stored snapshot.
    pub async fn analyze(&self, character_profile: &str) -> EngineResult<EmotionSnapshotRow> {
        let messages = self.store.recent_messages(ANALYSIS_MESSAGE_WINDOW)?;
        let conversation: String = messages
            .iter()
            .map(|m| {
                let who = if m.role == "user" { "用户" } else { "角色" };
                format!("{who}: {}\n", m.content)
            })
            .collect();

        let prompt = format!(
            "请基于以下对话记录，分析用户与角色之间当前的情感关系。\n\n\
             角色设定：\n{character_profile}\n\n\
             对话记录：\n{conversation}\n\
             请从五个维度评分（0-100）：亲密度(intimacy)、信任度(trust)、愉悦度(pleasure)、\
             共鸣度(resonance)、依赖度(dependence)，并给出总体评分和关系定位。\n\n\
             请以JSON格式输出（只返回JSON，不要其他文字）：\n\
             {{\n  \"relationship_type\": \"关系类型（如：初识/朋友/挚友）\",\n  \
             \"emotional_tone\": \"情感基调（如：友好/热络/疏离）\",\n  \
             \"overall_score\": 0,\n  \"intimacy\": 0,\n  \"trust\": 0,\n  \
             \"pleasure\": 0,\n  \"resonance\": 0,\n  \"dependence\": 0,\n  \
             \"analysis_summary\": \"简要分析\"\n}}"
        );
        let request = [
            ChatMessage::system("你是一个专业的情感关系分析师，只返回JSON格式数据。"),
            ChatMessage::user(prompt),
        ];

        let reply = self.chat.chat(&request, ModelTier::Main).await?;
        let parsed: AnalysisReply = llm_json::parse_strict(&reply)?;

        self.store.insert_emotion_snapshot(
            &parsed.relationship_type,
            &parsed.emotional_tone,
            parsed.overall_score,
            [
                parsed.intimacy,
                parsed.trust,
                parsed.pleasure,
                parsed.resonance,
                parsed.dependence,
            ],
            &parsed.analysis_summary,
        )
    }

    pub fn latest(&self) -> EngineResult<Option<EmotionSnapshotRow>> {
        self.store.latest_emotion_snapshot()
    }

    pub fn history(&self) -> EngineResult<Vec<EmotionSnapshotRow>> {
        self.store.list_emotion_snapshots()
    }

    /// Tone guidance derived from the latest snapshot; empty when no
    /// analysis has run yet.
    pub fn tone_prompt_block(&self) -> EngineResult<String> {
        let Some(snapshot) = self.latest()? else {
            return Ok(String::new());
        };
        Ok(format!(
            "【当前情感关系】\n\
             关系类型：{}\n情感基调：{}\n总体评分：{}/100\n\
             （亲密 {} · 信任 {} · 愉悦 {} · 共鸣 {} · 依赖 {}）\n\
             请让回复的语气与上述关系状态相符。",
            snapshot.relationship_type,
            snapshot.emotional_tone,
            snapshot.overall_score,
            snapshot.intimacy,
            snapshot.trust,
            snapshot.pleasure,
            snapshot.resonance,
            snapshot.dependence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    const REPLY: &str = r#"{"relationship_type": "朋友", "emotional_tone": "友好",
        "overall_score": 55, "intimacy": 50, "trust": 60, "pleasure": 55,
        "resonance": 50, "dependence": 40, "analysis_summary": "逐渐熟络"}"#;

    fn analyzer_with(script: Vec<Scripted>) -> EmotionAnalyzer {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        EmotionAnalyzer::new(store, chat, EngineSettings::default())
    }

    #[test]
    fn trigger_policy_first_then_interval() {
        let analyzer = analyzer_with(vec![Scripted::Reply(REPLY.into())]);

        assert!(!analyzer.should_analyze(4).unwrap());
        assert!(analyzer.should_analyze(5).unwrap());

        analyzer.store.set_counter(LAST_EMOTION_ROUNDS_KEY, 5).unwrap();
        assert!(!analyzer.should_analyze(19).unwrap());
        assert!(analyzer.should_analyze(20).unwrap());
    }

    #[tokio::test]
    async fn successful_analysis_advances_counter() {
        let analyzer = analyzer_with(vec![Scripted::Reply(REPLY.into())]);
        analyzer.store.add_message("user", "你好").unwrap();

        analyzer.maybe_analyze(5, "角色设定").await;
        assert_eq!(analyzer.store.get_counter(LAST_EMOTION_ROUNDS_KEY).unwrap(), 5);
        assert!(analyzer.latest().unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_analysis_keeps_counter_for_retry() {
        let analyzer = analyzer_with(vec![Scripted::Fail("offline".into())]);
        analyzer.maybe_analyze(5, "角色设定").await;
        assert_eq!(analyzer.store.get_counter(LAST_EMOTION_ROUNDS_KEY).unwrap(), 0);
        assert!(analyzer.latest().unwrap().is_none());
    }

    #[tokio::test]
    async fn tone_block_empty_without_snapshot() {
        let analyzer = analyzer_with(vec![Scripted::Reply(REPLY.into())]);
        assert!(analyzer.tone_prompt_block().unwrap().is_empty());

        analyzer.analyze("角色").await.unwrap();
        let block = analyzer.tone_prompt_block().unwrap();
        assert!(block.contains("朋友"));
        assert!(block.contains("55/100"));
    }
}
