// Eidolon Engine — Layered Memory
// Three layers: the bounded short-term message log (≤20 user rounds), the
// long-term topic summaries created by archival, and the knowledge graph fed
// by periodic extraction.
//
// On every user message:
//   • total_conversations (store metadata) increments;
//   • every 5th turn, knowledge extraction runs over the last 5 rounds;
//   • once the short-term log exceeds 20 user turns, the oldest 20 rounds
//     are summarised and deleted in one transaction.
// Both extraction and summarisation degrade gracefully — a turn never fails
// because a background memory step did.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::config::EngineSettings;
use crate::engine::knowledge::{extraction, KnowledgeGraph};
use crate::engine::providers::ChatModel;
use crate::engine::store::{AgentStore, StoredMessage, SummaryRow};
use log::{info, warn};
use std::sync::Arc;

pub const TOTAL_CONVERSATIONS_KEY: &str = "total_conversations";
const SUMMARIES_IN_CONTEXT: usize = 5;

pub struct LayeredMemory {
    store: Arc<AgentStore>,
    chat: ChatModel,
    graph: Arc<KnowledgeGraph>,
    settings: EngineSettings,
}

impl LayeredMemory {
    pub fn new(
        store: Arc<AgentStore>,
        chat: ChatModel,
        graph: Arc<KnowledgeGraph>,
        settings: EngineSettings,
    ) -> Self {
        Self { store, chat, graph, settings }
    }

    /// Append a message; user messages advance the round counter and may
    /// trigger extraction and archival.
    pub async fn add_message(&self, role: &str, content: &str) -> EngineResult<StoredMessage> {
        let msg = self.store.add_message(role, content)?;

        if role == "user" {
            let total = self.store.get_counter(TOTAL_CONVERSATIONS_KEY)? + 1;
            self.store.set_counter(TOTAL_CONVERSATIONS_KEY, total)?;

            if total % self.settings.knowledge_extraction_interval == 0 {
                info!("[memory] round {total}: extracting knowledge from recent turns");
                self.extract_recent_knowledge().await;
            }
        }

        self.archive_if_needed().await?;
        Ok(msg)
    }

    /// Total user turns ever seen (survives archival and restarts).
    pub fn total_conversations(&self) -> EngineResult<u64> {
        self.store.get_counter(TOTAL_CONVERSATIONS_KEY)
    }

    /// The most recent `count` short-term messages, chronological.
    pub fn recent_messages(&self, count: usize) -> EngineResult<Vec<StoredMessage>> {
        self.store.recent_messages(count)
    }

    pub fn summaries(&self) -> EngineResult<Vec<SummaryRow>> {
        self.store.list_summaries()
    }

    /// The last ≤5 summaries as one system block; empty when none exist.
    pub fn context_for_chat(&self) -> EngineResult<String> {
        let summaries = self.store.list_summaries()?;
        if summaries.is_empty() {
            return Ok(String::new());
        }
        let mut parts = vec!["【历史对话主题回顾】".to_string()];
        let tail = summaries.len().saturating_sub(SUMMARIES_IN_CONTEXT);
        for (i, summary) in summaries[tail..].iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, summary.summary));
        }
        Ok(parts.join("\n"))
    }

    // ── Knowledge extraction ──────────────────────────────────────────

    /// Extraction window: the last 5 rounds (user messages plus the replies
    /// interleaved between them).
    async fn extract_recent_knowledge(&self) {
        let window = match self.extraction_window() {
            Ok(w) if w.len() >= 2 => w,
            Ok(_) => return,
            Err(e) => {
                warn!("[memory] cannot read extraction window: {e}");
                return;
            }
        };

        let entries = extraction::extract_knowledge(&self.chat, &window).await;
        if entries.is_empty() {
            return;
        }
        if let Err(e) = extraction::apply_extracted(&self.graph, &entries) {
            warn!("[memory] failed to persist extracted knowledge: {e}");
        }
    }

    fn extraction_window(&self) -> EngineResult<Vec<StoredMessage>> {
        let interval = self.settings.knowledge_extraction_interval as usize;
        let all = self.store.all_messages()?;
        let mut window = Vec::new();
        let mut users = 0;
        for msg in all.into_iter().rev() {
            let is_user = msg.role == "user";
            window.push(msg);
            if is_user {
                users += 1;
                if users >= interval {
                    break;
                }
            }
        }
        window.reverse();
        Ok(window)
    }

    // ── Archival ──────────────────────────────────────────────────────

    async fn archive_if_needed(&self) -> EngineResult<()> {
        let user_count = self.store.count_user_messages()?;
        if user_count <= self.settings.max_short_term_rounds {
            return Ok(());
        }
        info!("[memory] short-term log at {user_count} rounds, archiving oldest");
        self.archive_oldest_rounds().await
    }

    /// Archive everything before the (max_rounds+1)-th user message: the
    /// oldest `max_rounds` full rounds, replies included.
    async fn archive_oldest_rounds(&self) -> EngineResult<()> {
        let max_rounds = self.settings.max_short_term_rounds;
        let all = self.store.all_messages()?;

        let mut to_archive: Vec<&StoredMessage> = Vec::new();
        let mut users = 0u64;
        for msg in &all {
            if msg.role == "user" {
                if users == max_rounds {
                    break;
                }
                users += 1;
            }
            to_archive.push(msg);
        }
        if to_archive.is_empty() {
            return Ok(());
        }

        let summary = self.summarise(&to_archive).await;
        let ids: Vec<String> = to_archive.iter().map(|m| m.id.clone()).collect();
        let first_ts = to_archive.first().map(|m| m.created_at.clone()).unwrap_or_default();
        let last_ts = to_archive.last().map(|m| m.created_at.clone()).unwrap_or_default();

        self.store
            .archive_messages(&summary, users as i64, &ids, &first_ts, &last_ts)?;
        info!(
            "[memory] archived {} rounds ({} messages): {}",
            users,
            ids.len(),
            summary.chars().take(50).collect::<String>()
        );
        Ok(())
    }

    /// Main-tier topic summary; on failure, a deterministic placeholder so
    /// archival still completes.
    async fn summarise(&self, messages: &[&StoredMessage]) -> String {
        let conversation: String = messages
            .iter()
            .map(|m| {
                let who = if m.role == "user" { "用户" } else { "助手" };
                format!("{who}: {}\n", m.content)
            })
            .collect();

        let prompt = format!(
            "请对以下对话进行主题概括，要求：\n\
             1. 用一句话总结对话的主要主题和内容\n\
             2. 提炼关键信息和讨论要点\n\
             3. 简洁明了，不超过100字\n\
             4. 只返回概括内容，不要有其他说明\n\n\
             对话内容：\n{conversation}\n\
             请给出主题概括："
        );
        let request = [
            ChatMessage::system("你是一个专业的对话分析助手，擅长总结对话主题。"),
            ChatMessage::user(prompt),
        ];

        match self.chat.chat(&request, ModelTier::Main).await {
            Ok(summary) if !summary.is_empty() => summary,
            Ok(_) | Err(_) => {
                warn!("[memory] summary generation failed, using placeholder");
                format!("对话记录 ({} 条消息)", messages.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    fn memory_with(script: Vec<Scripted>) -> LayeredMemory {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        let graph = Arc::new(KnowledgeGraph::new(store.clone(), chat.clone()));
        LayeredMemory::new(store, chat, graph, EngineSettings::default())
    }

    #[tokio::test]
    async fn user_messages_advance_the_counter() {
        let memory = memory_with(vec![Scripted::Reply("[]".into())]);
        memory.add_message("user", "hi").await.unwrap();
        memory.add_message("assistant", "hello").await.unwrap();
        memory.add_message("user", "again").await.unwrap();
        assert_eq!(memory.total_conversations().unwrap(), 2);
    }

    #[tokio::test]
    async fn archival_after_twenty_one_rounds() {
        // The scripted backend answers every call with the same text, which
        // serves as the extraction reply ("[]" is invalid for extraction and
        // is skipped) and the archival summary alike.
        let memory = memory_with(vec![Scripted::Reply("聊了日常生活".into())]);

        for i in 0..21 {
            memory.add_message("user", &format!("问题{i}")).await.unwrap();
            if i < 20 {
                memory.add_message("assistant", &format!("回答{i}")).await.unwrap();
            }
        }

        let remaining = memory.store.all_messages().unwrap();
        let user_left = remaining.iter().filter(|m| m.role == "user").count();
        assert_eq!(user_left, 1, "one user turn left in short-term");

        let summaries = memory.summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].rounds, 20);
        assert_eq!(summaries[0].message_count, 40);

        // Archived rounds + current short-term rounds = total conversations.
        let total = memory.total_conversations().unwrap();
        assert_eq!(summaries[0].rounds as u64 + user_left as u64, total);
    }

    #[tokio::test]
    async fn context_for_chat_renders_last_five_summaries() {
        let memory = memory_with(vec![Scripted::Reply("x".into())]);
        for i in 0..7 {
            memory
                .store
                .archive_messages(&format!("主题{i}"), 20, &[], "t0", "t1")
                .unwrap();
        }
        let block = memory.context_for_chat().unwrap();
        assert!(block.contains("主题2"));
        assert!(block.contains("主题6"));
        assert!(!block.contains("主题1\n"));
    }

    #[tokio::test]
    async fn empty_summary_list_renders_empty_context() {
        let memory = memory_with(vec![Scripted::Reply("x".into())]);
        assert!(memory.context_for_chat().unwrap().is_empty());
    }
}
