// Shared test harness: an in-memory store plus a stub chat backend that
// routes on the request's system prompt, so a full kernel turn (entity
// extraction, intent classifiers, extraction, emotion, the final reply)
// gets a sensible answer for every call regardless of ordering.

use async_trait::async_trait;
use eidolon::engine::providers::TierConfig;
use eidolon::{ChatBackend, ChatMessage, ChatModel, EngineResult, ModelConfig};
use parking_lot::Mutex;
use std::sync::Arc;

pub enum Rule {
    Reply(&'static str, String),
    Fail(&'static str, String),
}

pub struct StubBackend {
    /// Checked in order against the full request text; first match wins.
    pub rules: Mutex<Vec<Rule>>,
    /// Answer for the final Main-tier reply (no rule matched).
    pub default_reply: String,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubBackend {
    pub fn new(default_reply: &str) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: default_reply.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rule(self, needle: &'static str, reply: &str) -> Self {
        self.rules.lock().push(Rule::Reply(needle, reply.to_string()));
        self
    }

    pub fn with_failure(self, needle: &'static str, error: &str) -> Self {
        self.rules.lock().push(Rule::Fail(needle, error.to_string()));
        self
    }
}

#[async_trait]
impl ChatBackend for StubBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tier: &TierConfig,
    ) -> EngineResult<String> {
        self.calls.lock().push(messages.to_vec());
        let text: String = messages.iter().map(|m| m.content.as_str()).collect();

        for rule in self.rules.lock().iter() {
            match rule {
                Rule::Reply(needle, reply) if text.contains(needle) => {
                    return Ok(reply.clone());
                }
                Rule::Fail(needle, error) if text.contains(needle) => {
                    return Err(eidolon::EngineError::Upstream(error.clone()));
                }
                _ => {}
            }
        }

        // Built-in neutral answers for the engine's classifier prompts.
        if text.contains("实体识别助手") {
            return Ok("[]".to_string());
        }
        if text.contains("知识提取助手") {
            return Ok("[]".to_string());
        }
        if text.contains("日程意图识别专家") {
            return Ok(
                r#"{"has_schedule_intent": false, "schedule_type": "none", "title": "",
                    "description": "", "time_expression": "", "start_time": null,
                    "end_time": null, "involves_agent": false, "involves_user": false,
                    "confidence": 0.0, "reasoning": ""}"#
                    .to_string(),
            );
        }
        if text.contains("情感关系分析师") {
            return Ok(
                r#"{"relationship_type": "朋友", "emotional_tone": "友好",
                    "overall_score": 50, "intimacy": 50, "trust": 50, "pleasure": 50,
                    "resonance": 50, "dependence": 50, "analysis_summary": "稳定"}"#
                    .to_string(),
            );
        }
        if text.contains("语言习惯分析助手") {
            return Ok("[]".to_string());
        }
        if text.contains("意图判断助手") {
            return Ok("{\"wants_switch\": false}".to_string());
        }
        if text.contains("查询精度判断助手") {
            return Ok("{\"high_precision\": false}".to_string());
        }
        if text.contains("日程管理专家") {
            return Ok(
                "{\"is_similar\": false, \"keep_schedule\": \"none\", \"reason\": \"\"}"
                    .to_string(),
            );
        }
        if text.contains("对话分析助手") {
            return Ok("聊了一些日常话题".to_string());
        }

        Ok(self.default_reply.clone())
    }
}

pub fn stub_model(backend: StubBackend) -> (ChatModel, Arc<StubBackend>) {
    let backend = Arc::new(backend);
    let config = ModelConfig {
        api_url: "http://localhost/unused".into(),
        api_key: "test".into(),
        main: TierConfig { model: "main".into(), temperature: 0.8, max_tokens: 2000 },
        tool: TierConfig { model: "tool".into(), temperature: 0.3, max_tokens: 500 },
        vision: TierConfig { model: "vision".into(), temperature: 0.5, max_tokens: 1000 },
    };
    (ChatModel::with_backend(config, backend.clone()), backend)
}

pub fn test_profile() -> eidolon::CharacterProfile {
    let mut profile = eidolon::CharacterProfile::from_env();
    profile.name = "小可".into();
    profile.personality = "活泼开朗".into();
    profile.hobby = "历史".into();
    profile
}
