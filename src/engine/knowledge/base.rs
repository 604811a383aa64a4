// Base knowledge: top-priority immutable facts keyed by entity name.
// These outrank everything the agent learns from conversation — even when
// they contradict common sense, the base fact wins. They are embedded
// directly into the system prompt rather than retrieved as context.

use crate::atoms::error::EngineResult;
use crate::engine::store::{AgentStore, BaseFactRow};
use log::warn;
use std::sync::Arc;

pub struct BaseKnowledge {
    store: Arc<AgentStore>,
}

impl BaseKnowledge {
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self { store }
    }

    /// Add a fact. Refuses (EngineError::Immutable) when one already exists
    /// for this name — base knowledge is never overwritten.
    pub fn add_fact(
        &self,
        entity_name: &str,
        content: &str,
        category: &str,
        description: &str,
    ) -> EngineResult<BaseFactRow> {
        self.store.insert_base_fact(entity_name, content, category, description)
    }

    /// Exact-then-case-insensitive lookup.
    pub fn get(&self, entity_name: &str) -> EngineResult<Option<BaseFactRow>> {
        self.store.get_base_fact(entity_name)
    }

    pub fn all(&self) -> EngineResult<Vec<BaseFactRow>> {
        self.store.all_base_facts()
    }

    /// True when a base fact exists for this name whose content differs from
    /// the candidate (after trimming) — i.e. the candidate must be refused.
    pub fn conflicts_with(&self, entity_name: &str, candidate: &str) -> EngineResult<bool> {
        let Some(fact) = self.get(entity_name)? else {
            return Ok(false);
        };
        let conflict = fact.content.trim() != candidate.trim();
        if conflict {
            warn!(
                "[knowledge] base-knowledge conflict for '{}': keeping \"{}\"",
                entity_name, fact.content
            );
        }
        Ok(conflict)
    }

    /// Fixed-layout markdown block grouped by category, for direct embedding
    /// into the system prompt. Empty string when no facts exist.
    pub fn prompt_block(&self) -> EngineResult<String> {
        let facts = self.all()?;
        if facts.is_empty() {
            return Ok(String::new());
        }

        let mut parts = vec![
            "【核心基础知识 - 最高优先级】".to_string(),
            "以下是你必须遵守的核心基础知识，即使与其他信息相悖，也以这些知识为准：".to_string(),
            String::new(),
        ];

        // `all()` returns rows ordered by (category, name); walk the groups.
        let mut current_category: Option<&str> = None;
        for fact in &facts {
            if current_category != Some(fact.category.as_str()) {
                if current_category.is_some() {
                    parts.push(String::new());
                }
                parts.push(format!("[{}]", fact.category));
                current_category = Some(fact.category.as_str());
            }
            parts.push(format!("• {}", fact.content));
            if !fact.description.is_empty() {
                parts.push(format!("  说明: {}", fact.description));
            }
        }

        parts.push(String::new());
        parts.push("请在所有回答中严格遵循以上基础知识。".to_string());
        Ok(parts.join("\n"))
    }
}
