// Eidolon Engine — Knowledge Graph
// Entity → (one definition, many related infos), with base knowledge as the
// immovable top layer. Write rules:
//   • set_definition refuses content that conflicts with a base fact, and
//     persists the base content as an immutable definition when the entity
//     has none yet.
//   • add_related_info dedupes by normalised content, bumping mention_count.
// Retrieval extracts candidate entity names with the Tool model, then ranks
// base facts (priority 0), definitions (1) and up to 3 related infos (2) by
// (priority asc, confidence desc), truncated to max_items.

pub mod base;
pub mod extraction;

pub use base::BaseKnowledge;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::{AgentStore, RelatedInfoRow};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_MAX_ITEMS: usize = 10;
const RELATED_INFO_PER_ENTITY: usize = 3;

// ── Retrieval result types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Base,
    Definition,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub entity_name: String,
    pub kind: KnowledgeKind,
    /// Free-form type label ("定义", "偏好", "经历", …).
    pub type_label: String,
    pub content: String,
    pub confidence: f64,
    /// 0 = base, 1 = definition, 2 = related info.
    pub priority: i64,
    pub status: Option<String>,
    pub mention_count: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedKnowledge {
    pub query: String,
    pub entities: Vec<String>,
    pub items: Vec<KnowledgeItem>,
}

/// Confidence display bands: high ≥ 0.9, medium ≥ 0.7, low otherwise.
pub fn confidence_band(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "高"
    } else if confidence >= 0.7 {
        "中"
    } else {
        "低"
    }
}

// ── The graph facade ───────────────────────────────────────────────────────

pub struct KnowledgeGraph {
    store: Arc<AgentStore>,
    chat: ChatModel,
    base: BaseKnowledge,
    max_items: usize,
}

impl KnowledgeGraph {
    pub fn new(store: Arc<AgentStore>, chat: ChatModel) -> Self {
        let base = BaseKnowledge::new(store.clone());
        Self { store, chat, base, max_items: DEFAULT_MAX_ITEMS }
    }

    pub fn base(&self) -> &BaseKnowledge {
        &self.base
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Set an entity's definition.
    ///
    /// When the content conflicts with a base fact the write is refused with
    /// EngineError::Conflict; if the entity has no definition yet, the base
    /// content is persisted first as an immutable definition so later reads
    /// see the authoritative text.
    pub fn set_definition(
        &self,
        entity_name: &str,
        content: &str,
        type_label: &str,
        source: &str,
        confidence: f64,
    ) -> EngineResult<String> {
        if self.base.conflicts_with(entity_name, content)? {
            let entity_uuid = self.store.find_or_create_entity(entity_name)?;
            if self.store.get_definition(&entity_uuid)?.is_none() {
                if let Some(fact) = self.base.get(entity_name)? {
                    self.store.set_definition(
                        &entity_uuid,
                        &fact.content,
                        "基础知识",
                        "base_knowledge",
                        1.0,
                        100,
                        true,
                    )?;
                }
            }
            return Err(EngineError::conflict(format!(
                "definition for '{entity_name}' conflicts with base knowledge"
            )));
        }

        let entity_uuid = self.store.find_or_create_entity(entity_name)?;
        self.store
            .set_definition(&entity_uuid, content, type_label, source, confidence, 50, false)?;
        Ok(entity_uuid)
    }

    /// Add related info by entity name, creating the entity lazily.
    /// A content duplicate increments mention_count instead of inserting.
    pub fn add_related_info(
        &self,
        entity_name: &str,
        content: &str,
        type_label: &str,
        source: &str,
        confidence: f64,
    ) -> EngineResult<RelatedInfoRow> {
        let entity_uuid = self.store.find_or_create_entity(entity_name)?;
        self.store.add_or_increment_related_info(
            &entity_uuid,
            content,
            type_label,
            source,
            confidence,
            crate::engine::store::STATUS_SUSPECTED,
        )
    }

    /// Promote a related info row to confirmed.
    pub fn confirm_related_info(&self, info_uuid: &str) -> EngineResult<()> {
        self.store
            .set_related_info_status(info_uuid, crate::engine::store::STATUS_CONFIRMED)
    }

    // ── Retrieval ─────────────────────────────────────────────────────

    /// Extract candidate entity names from the query and collect their
    /// ranked knowledge.
    pub async fn retrieve(&self, query: &str) -> EngineResult<RetrievedKnowledge> {
        let entities = self.extract_entities(query).await;
        if entities.is_empty() {
            debug!("[knowledge] no entities recognised in query");
            return Ok(RetrievedKnowledge { query: query.to_string(), ..Default::default() });
        }

        let mut items: Vec<KnowledgeItem> = Vec::new();
        let mut found: Vec<String> = Vec::new();

        for name in &entities {
            if let Some(fact) = self.base.get(name)? {
                items.push(KnowledgeItem {
                    entity_name: fact.entity_name.clone(),
                    kind: KnowledgeKind::Base,
                    type_label: "基础知识".into(),
                    content: fact.content.clone(),
                    confidence: 1.0,
                    priority: 0,
                    status: None,
                    mention_count: None,
                });
                if !found.contains(name) {
                    found.push(name.clone());
                }
            }

            let Some(entity) = self.store.get_entity_by_name(name)? else {
                continue;
            };
            if !found.contains(name) {
                found.push(name.clone());
            }

            if let Some(def) = self.store.get_definition(&entity.uuid)? {
                if !def.is_base_knowledge {
                    items.push(KnowledgeItem {
                        entity_name: entity.name.clone(),
                        kind: KnowledgeKind::Definition,
                        type_label: def.kind.clone(),
                        content: def.content.clone(),
                        confidence: def.confidence,
                        priority: 1,
                        status: None,
                        mention_count: None,
                    });
                }
            }

            // Store order is already confirmed-first, newest-first.
            for info in self
                .store
                .related_info_for(&entity.uuid)?
                .into_iter()
                .take(RELATED_INFO_PER_ENTITY)
            {
                items.push(KnowledgeItem {
                    entity_name: entity.name.clone(),
                    kind: KnowledgeKind::Info,
                    type_label: info.kind.clone(),
                    content: info.content.clone(),
                    confidence: info.confidence,
                    priority: 2,
                    status: Some(info.status.clone()),
                    mention_count: Some(info.mention_count),
                });
            }
        }

        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });
        items.truncate(self.max_items);

        info!(
            "[knowledge] retrieved {} items across {} entities",
            items.len(),
            found.len()
        );
        Ok(RetrievedKnowledge { query: query.to_string(), entities: found, items })
    }

    /// Tool-tier entity extraction. On any failure, falls back to matching
    /// known entity and base-fact names as substrings of the query.
    async fn extract_entities(&self, query: &str) -> Vec<String> {
        let prompt = format!(
            "请从以下用户输入中提取所有可能相关的主体（实体）名称。\n\
             主体可以是：人名、物品名、概念名、地点名、事件名等。\n\n\
             用户输入：\n{query}\n\n\
             请以JSON数组格式返回主体名称列表（只返回JSON，不要其他文字）：\n\
             [\"主体1\", \"主体2\", ...]\n\n\
             如果没有明确的主体，返回空数组 []"
        );
        let messages = [
            ChatMessage::system("你是一个专业的实体识别助手，只返回JSON格式数据。"),
            ChatMessage::user(prompt),
        ];

        match self.chat.chat(&messages, ModelTier::Tool).await {
            Ok(reply) => match llm_json::parse_strict::<Vec<String>>(&reply) {
                Ok(entities) => entities,
                Err(e) => {
                    warn!("[knowledge] entity extraction unparsable ({e}), matching known names");
                    self.match_known_names(query)
                }
            },
            Err(e) => {
                warn!("[knowledge] entity extraction failed ({e}), matching known names");
                self.match_known_names(query)
            }
        }
    }

    fn match_known_names(&self, query: &str) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entities) = self.store.all_entities() {
            for entity in entities {
                if query.contains(&entity.name) {
                    names.push(entity.name);
                }
            }
        }
        if let Ok(facts) = self.store.all_base_facts() {
            for fact in facts {
                if query.contains(&fact.entity_name) && !names.contains(&fact.entity_name) {
                    names.push(fact.entity_name);
                }
            }
        }
        names
    }

    // ── Context rendering ─────────────────────────────────────────────

    /// Render retrieved knowledge into the system block handed to the main
    /// model: base facts emphasised, then definitions, then related info,
    /// grouped per entity with confidence band labels.
    pub fn context_block(retrieved: &RetrievedKnowledge) -> String {
        if retrieved.items.is_empty() {
            return String::new();
        }

        let mut parts = vec![
            "【相关知识库信息】".to_string(),
            format!("用户提到了以下主体：{}", retrieved.entities.join(", ")),
        ];

        let base_items: Vec<&KnowledgeItem> = retrieved
            .items
            .iter()
            .filter(|i| i.kind == KnowledgeKind::Base)
            .collect();
        if !base_items.is_empty() {
            parts.push("\n以下是核心基础知识（优先级最高，必须严格遵循）：".into());
            for item in &base_items {
                parts.push(format!("  [基础] {}: {}", item.entity_name, item.content));
            }
        }

        parts.push("\n请根据以下知识回答（优先基础知识，其次定义，最后相关信息）：".into());

        for entity in &retrieved.entities {
            let entity_items: Vec<&KnowledgeItem> = retrieved
                .items
                .iter()
                .filter(|i| &i.entity_name == entity && i.kind != KnowledgeKind::Base)
                .collect();
            if entity_items.is_empty() {
                continue;
            }
            parts.push(format!("\n关于「{entity}」："));
            for item in entity_items {
                match item.kind {
                    KnowledgeKind::Definition => parts.push(format!(
                        "  【{}置信度】定义: {}",
                        confidence_band(item.confidence),
                        item.content
                    )),
                    KnowledgeKind::Info => parts.push(format!(
                        "    【{}】{}: {}",
                        confidence_band(item.confidence),
                        item.type_label,
                        item.content
                    )),
                    KnowledgeKind::Base => {}
                }
            }
        }

        parts.push("\n请基于以上知识库信息进行回答，保持角色设定的同时确保信息准确。".into());
        parts.join("\n")
    }

    // ── Host-facing listings ──────────────────────────────────────────

    /// Every definition and related info row, flattened.
    pub fn all_knowledge(&self) -> EngineResult<Vec<KnowledgeItem>> {
        let mut result = Vec::new();
        for entity in self.store.all_entities()? {
            if let Some(def) = self.store.get_definition(&entity.uuid)? {
                result.push(KnowledgeItem {
                    entity_name: entity.name.clone(),
                    kind: if def.is_base_knowledge {
                        KnowledgeKind::Base
                    } else {
                        KnowledgeKind::Definition
                    },
                    type_label: def.kind,
                    content: def.content,
                    confidence: def.confidence,
                    priority: if def.is_base_knowledge { 0 } else { 1 },
                    status: None,
                    mention_count: None,
                });
            }
            for info in self.store.related_info_for(&entity.uuid)? {
                result.push(KnowledgeItem {
                    entity_name: entity.name.clone(),
                    kind: KnowledgeKind::Info,
                    type_label: info.kind,
                    content: info.content,
                    confidence: info.confidence,
                    priority: 2,
                    status: Some(info.status),
                    mention_count: Some(info.mention_count),
                });
            }
        }
        Ok(result)
    }

    /// Keyword / type / entity filtering over the flattened listing.
    pub fn search(
        &self,
        keyword: Option<&str>,
        type_label: Option<&str>,
        entity_name: Option<&str>,
    ) -> EngineResult<Vec<KnowledgeItem>> {
        let mut results = self.all_knowledge()?;
        if let Some(entity) = entity_name {
            let needle = entity.to_lowercase();
            results.retain(|k| k.entity_name.to_lowercase().contains(&needle));
        }
        if let Some(kw) = keyword {
            let needle = kw.to_lowercase();
            results.retain(|k| {
                k.content.to_lowercase().contains(&needle)
                    || k.entity_name.to_lowercase().contains(&needle)
            });
        }
        if let Some(t) = type_label {
            results.retain(|k| k.type_label == t);
        }
        results.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    fn graph_with(script: Vec<Scripted>) -> KnowledgeGraph {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let (chat, _) = scripted_model(script);
        KnowledgeGraph::new(store, chat)
    }

    #[tokio::test]
    async fn base_override_persists_base_definition_and_conflicts() {
        let graph = graph_with(vec![Scripted::Reply("[\"HeDaas\"]".into())]);
        graph
            .base()
            .add_fact("HeDaas", "HeDaas是一个高校", "机构类型", "")
            .unwrap();

        let err = graph
            .set_definition("HeDaas", "HeDaas是一家公司", "定义", "chat", 0.9)
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let retrieved = graph.retrieve("HeDaas是什么").await.unwrap();
        let def = retrieved
            .items
            .iter()
            .find(|i| i.kind == KnowledgeKind::Base)
            .expect("base item present");
        assert_eq!(def.content, "HeDaas是一个高校");

        // Repeated conflicting writes still leave the base definition alone.
        let _ = graph.set_definition("HeDaas", "HeDaas是一家银行", "定义", "chat", 0.9);
        let entity = graph.store.get_entity_by_name("HeDaas").unwrap().unwrap();
        let stored = graph.store.get_definition(&entity.uuid).unwrap().unwrap();
        assert!(stored.is_base_knowledge);
        assert_eq!(stored.content, "HeDaas是一个高校");
    }

    #[tokio::test]
    async fn retrieve_ranks_base_then_definition_then_info() {
        let graph = graph_with(vec![Scripted::Reply("[\"小明\"]".into())]);
        graph.set_definition("小明", "小明是学生", "定义", "chat", 0.95).unwrap();
        graph.add_related_info("小明", "喜欢看书", "偏好", "chat", 0.8).unwrap();
        graph.add_related_info("小明", "住在上海", "事实", "chat", 0.85).unwrap();

        let retrieved = graph.retrieve("小明关于看书").await.unwrap();
        assert_eq!(retrieved.entities, vec!["小明".to_string()]);
        assert_eq!(retrieved.items[0].kind, KnowledgeKind::Definition);
        assert!(retrieved.items.iter().any(|i| i.content == "喜欢看书"));
    }

    #[tokio::test]
    async fn duplicate_related_info_survives_as_one_item() {
        let graph = graph_with(vec![Scripted::Reply("[\"小明\"]".into())]);
        for _ in 0..3 {
            graph.add_related_info("小明", "喜欢看书", "偏好", "chat", 0.8).unwrap();
        }
        let retrieved = graph.retrieve("小明关于看书").await.unwrap();
        let matching: Vec<_> =
            retrieved.items.iter().filter(|i| i.content == "喜欢看书").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].mention_count, Some(3));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_known_name_matching() {
        let graph = graph_with(vec![Scripted::Fail("offline".into())]);
        graph.set_definition("小明", "小明是学生", "定义", "chat", 0.9).unwrap();

        let retrieved = graph.retrieve("跟我说说小明吧").await.unwrap();
        assert_eq!(retrieved.entities, vec!["小明".to_string()]);
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(confidence_band(0.95), "高");
        assert_eq!(confidence_band(0.75), "中");
        assert_eq!(confidence_band(0.5), "低");
    }

    #[test]
    fn context_block_emphasises_base_knowledge() {
        let retrieved = RetrievedKnowledge {
            query: "q".into(),
            entities: vec!["HeDaas".into()],
            items: vec![KnowledgeItem {
                entity_name: "HeDaas".into(),
                kind: KnowledgeKind::Base,
                type_label: "基础知识".into(),
                content: "HeDaas是一个高校".into(),
                confidence: 1.0,
                priority: 0,
                status: None,
                mention_count: None,
            }],
        };
        let block = KnowledgeGraph::context_block(&retrieved);
        assert!(block.contains("核心基础知识"));
        assert!(block.contains("HeDaas是一个高校"));
    }
}
