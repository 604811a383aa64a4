// Eidolon Engine — Expression Styles
// Two kinds of style rows:
//   agent — curated quirks the character should use ("wc" = 惊讶), rendered
//           into a prompt block so replies keep the persona's voice;
//   user  — habits learned from the user's own messages on a round
//           interval, rendered as understanding context so the agent reads
//           the user's slang correctly.
// Learning asks the Tool model for a strict JSON array; failures log and
// skip without advancing the round counter.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::config::EngineSettings;
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::{AgentStore, ExpressionRow, StoredMessage, EXPR_AGENT, EXPR_USER};
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

pub const LAST_EXPRESSION_LEARN_KEY: &str = "last_expression_learn_rounds";
const LEARNING_MESSAGE_WINDOW: usize = 20;

#[derive(Debug, Deserialize)]
struct LearnedHabit {
    expression: String,
    #[serde(default)]
    meaning: String,
    #[serde(default = "general_category")]
    category: String,
}

fn general_category() -> String {
    "通用".to_string()
}

pub struct ExpressionStyleManager {
    store: Arc<AgentStore>,
    chat: ChatModel,
    settings: EngineSettings,
}

impl ExpressionStyleManager {
    pub fn new(store: Arc<AgentStore>, chat: ChatModel, settings: EngineSettings) -> Self {
        Self { store, chat, settings }
    }

    // ── Agent expressions ─────────────────────────────────────────────

    pub fn add_agent_expression(
        &self,
        expression: &str,
        meaning: &str,
        category: &str,
    ) -> EngineResult<ExpressionRow> {
        self.store.insert_expression(EXPR_AGENT, expression, meaning, category)
    }

    pub fn agent_expressions(&self) -> EngineResult<Vec<ExpressionRow>> {
        self.store.expressions_by_kind(EXPR_AGENT)
    }

    pub fn delete_expression(&self, uuid: &str) -> EngineResult<()> {
        self.store.delete_expression(uuid)
    }

    /// Prompt block teaching the model the character's own quirks.
    pub fn agent_expression_block(&self) -> EngineResult<String> {
        let rows = self.agent_expressions()?;
        if rows.is_empty() {
            return Ok(String::new());
        }
        let mut parts = vec![
            "【个性化表达】".to_string(),
            "以下是你习惯使用的表达方式，在合适的场景自然地使用它们：".to_string(),
        ];
        for row in rows {
            parts.push(format!("• \"{}\" — {}", row.expression, row.meaning));
        }
        Ok(parts.join("\n"))
    }

    // ── User habits ───────────────────────────────────────────────────

    pub fn user_habits(&self) -> EngineResult<Vec<ExpressionRow>> {
        self.store.expressions_by_kind(EXPR_USER)
    }

    pub fn clear_user_habits(&self) -> EngineResult<usize> {
        self.store.clear_expressions(EXPR_USER)
    }

    /// Context block explaining the user's slang to the model.
    pub fn user_expression_block(&self) -> EngineResult<String> {
        let rows = self.user_habits()?;
        if rows.is_empty() {
            return Ok(String::new());
        }
        let mut parts = vec![
            "【用户表达习惯】".to_string(),
            "用户常用的表达及其含义，理解用户消息时参考：".to_string(),
        ];
        for row in rows {
            parts.push(format!("• \"{}\" — {}", row.expression, row.meaning));
        }
        Ok(parts.join("\n"))
    }

    /// Whether learning is due at `current_rounds`.
    pub fn should_learn(&self, current_rounds: u64) -> EngineResult<bool> {
        let last = self.store.get_counter(LAST_EXPRESSION_LEARN_KEY)?;
        Ok(current_rounds >= last + self.settings.expression_learn_interval)
    }

    /// Run the trigger check and, when due, learn from the last 20
    /// messages. Failures are logged and the counter stays put.
    pub async fn maybe_learn(&self, current_rounds: u64) {
        match self.should_learn(current_rounds) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("[expression] trigger check failed: {e}");
                return;
            }
        }

        let messages = match self.store.recent_messages(LEARNING_MESSAGE_WINDOW) {
            Ok(m) => m,
            Err(e) => {
                warn!("[expression] cannot read recent messages: {e}");
                return;
            }
        };

        match self.learn_user_expressions(&messages).await {
            Ok(learned) => {
                if let Err(e) = self.store.set_counter(LAST_EXPRESSION_LEARN_KEY, current_rounds) {
                    warn!("[expression] failed to persist learning round: {e}");
                }
                info!("[expression] learned {learned} user habits at round {current_rounds}");
            }
            Err(e) => warn!("[expression] learning failed, will retry: {e}"),
        }
    }

    /// One learning pass over the given messages; returns how many habits
    /// were stored (duplicates fold into existing rows).
    pub async fn learn_user_expressions(&self, messages: &[StoredMessage]) -> EngineResult<usize> {
        let user_text: String = messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| format!("{}\n", m.content))
            .collect();
        if user_text.trim().is_empty() {
            return Ok(0);
        }

        let prompt = format!(
            "请从以下用户消息中识别用户的个性化表达习惯（缩写、口头禅、网络用语等）。\n\
             只提取反复出现或明显个人化的表达，不要提取普通词汇。\n\n\
             用户消息：\n{user_text}\n\
             请以JSON数组输出（只返回JSON，没有发现则返回 []）：\n\
             [{{\"expression\": \"表达\", \"meaning\": \"含义\", \"category\": \"分类\"}}]"
        );
        let request = [
            ChatMessage::system("你是一个语言习惯分析助手，只返回JSON格式数据。"),
            ChatMessage::user(prompt),
        ];

        let reply = self.chat.chat(&request, ModelTier::Tool).await?;
        let habits: Vec<LearnedHabit> = llm_json::parse_strict(&reply)?;

        let mut stored = 0;
        for habit in habits {
            if habit.expression.trim().is_empty() {
                continue;
            }
            self.store
                .insert_expression(EXPR_USER, &habit.expression, &habit.meaning, &habit.category)?;
            stored += 1;
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    fn manager_with(script: Vec<Scripted>) -> ExpressionStyleManager {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        ExpressionStyleManager::new(store, chat, EngineSettings::default())
    }

    #[test]
    fn agent_block_lists_expressions() {
        let manager = manager_with(vec![Scripted::Reply("[]".into())]);
        assert!(manager.agent_expression_block().unwrap().is_empty());

        manager.add_agent_expression("wc", "表示惊讶", "网络用语").unwrap();
        let block = manager.agent_expression_block().unwrap();
        assert!(block.contains("wc"));
        assert!(block.contains("表示惊讶"));
    }

    #[test]
    fn learning_trigger_uses_interval() {
        let manager = manager_with(vec![Scripted::Reply("[]".into())]);
        // Interval 10: due at round 10, not at 9.
        assert!(!manager.should_learn(9).unwrap());
        assert!(manager.should_learn(10).unwrap());

        manager.store.set_counter(LAST_EXPRESSION_LEARN_KEY, 10).unwrap();
        assert!(!manager.should_learn(19).unwrap());
        assert!(manager.should_learn(20).unwrap());
    }

    #[tokio::test]
    async fn successful_learning_advances_counter() {
        let manager = manager_with(vec![Scripted::Reply(
            r#"[{"expression": "yyds", "meaning": "永远的神，表示极高赞美", "category": "网络用语"}]"#
                .into(),
        )]);
        manager.store.add_message("user", "这家店yyds").unwrap();

        manager.maybe_learn(10).await;
        assert_eq!(manager.store.get_counter(LAST_EXPRESSION_LEARN_KEY).unwrap(), 10);
        let habits = manager.user_habits().unwrap();
        assert_eq!(habits.len(), 1);
        assert_eq!(habits[0].expression, "yyds");
    }

    #[tokio::test]
    async fn failed_learning_keeps_counter() {
        let manager = manager_with(vec![Scripted::Fail("offline".into())]);
        manager.store.add_message("user", "这家店yyds").unwrap();
        manager.maybe_learn(10).await;
        assert_eq!(manager.store.get_counter(LAST_EXPRESSION_LEARN_KEY).unwrap(), 0);
    }

    #[tokio::test]
    async fn learning_skips_without_user_text() {
        let manager = manager_with(vec![Scripted::Reply("[]".into())]);
        let learned = manager.learn_user_expressions(&[]).await.unwrap();
        assert_eq!(learned, 0);
    }
}
