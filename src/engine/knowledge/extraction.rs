// Knowledge extraction: every 5 user turns, mine the user's own statements
// (never the assistant's replies) for entities, definitions and related
// info. The Tool model must answer with a strict JSON array; anything else
// is logged and skipped — extraction never fails a chat turn.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::StoredMessage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::KnowledgeGraph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedKnowledge {
    pub entity_name: String,
    #[serde(default)]
    pub is_definition: bool,
    pub content: String,
    #[serde(rename = "type", default)]
    pub type_label: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

const EXTRACTION_SYSTEM: &str = "你是一个专业的知识提取助手，擅长从用户的陈述中识别主体、定义和相关信息。\
你只从用户明确说出的内容中提取信息，不进行推断。你只返回JSON格式的数据，不添加任何解释。";

fn extraction_prompt(user_text: &str) -> String {
    format!(
        "请从以下用户的语句中提取关键信息和知识点。\n\n\
         重要要求：\n\
         1. 只提取用户明确陈述的信息，不要推断或假设\n\
         2. 识别用户提到的主体（entity）：如人名、物品名、概念名等\n\
         3. 对每个主体，区分定义（definition：主体的核心定义）与相关信息（related_info：其他属性、特征、偏好等）\n\
         4. 每个主体只应有一个定义，冲突时以最新的为准\n\
         5. 知识类型包括：个人信息、偏好、事实、经历、观点、定义等\n\
         6. 只提取明确的、有价值的信息；没有值得记录的知识时返回空列表\n\n\
         返回JSON格式（只返回JSON数组，不要其他文字）：\n\
         [\n  {{\n    \"entity_name\": \"主体名称\",\n    \"is_definition\": true,\n    \
         \"content\": \"定义内容或相关信息内容\",\n    \"type\": \"知识类型\",\n    \
         \"source\": \"用户陈述\",\n    \"confidence\": 0.9\n  }}\n]\n\n\
         用户语句：\n{user_text}\n\n\
         请提取知识点（只返回JSON数组）："
    )
}

/// Extract knowledge entries from the given recent messages.
/// Returns an empty list when the user said nothing or the reply is
/// unparsable — never an error that would fail the turn.
pub async fn extract_knowledge(
    chat: &ChatModel,
    messages: &[StoredMessage],
) -> Vec<ExtractedKnowledge> {
    let user_text: String = messages
        .iter()
        .filter(|m| m.role == "user")
        .map(|m| format!("用户: {}\n", m.content))
        .collect();

    if user_text.is_empty() {
        return Vec::new();
    }

    let request = [
        ChatMessage::system(EXTRACTION_SYSTEM),
        ChatMessage::user(extraction_prompt(&user_text)),
    ];

    let reply = match chat.chat(&request, ModelTier::Tool).await {
        Ok(r) => r,
        Err(e) => {
            warn!("[knowledge] extraction call failed, skipping: {e}");
            return Vec::new();
        }
    };

    match llm_json::parse_strict::<Vec<ExtractedKnowledge>>(&reply) {
        Ok(list) => list,
        Err(e) => {
            warn!("[knowledge] extraction reply unparsable, skipping: {e}");
            Vec::new()
        }
    }
}

/// Persist extracted entries: definitions via set_definition (respecting
/// base-knowledge rules), the rest as related info. Write failures on
/// individual entries are logged and skipped.
pub fn apply_extracted(graph: &KnowledgeGraph, entries: &[ExtractedKnowledge]) -> EngineResult<usize> {
    let mut saved = 0;
    for entry in entries {
        if entry.entity_name.is_empty() || entry.content.is_empty() {
            continue;
        }
        let source = if entry.source.is_empty() { "对话提取" } else { &entry.source };
        let result = if entry.is_definition {
            graph
                .set_definition(
                    &entry.entity_name,
                    &entry.content,
                    if entry.type_label.is_empty() { "定义" } else { &entry.type_label },
                    source,
                    entry.confidence,
                )
                .map(|_| ())
        } else {
            graph
                .add_related_info(
                    &entry.entity_name,
                    &entry.content,
                    if entry.type_label.is_empty() { "其他" } else { &entry.type_label },
                    source,
                    entry.confidence,
                )
                .map(|_| ())
        };
        match result {
            Ok(()) => saved += 1,
            Err(e) => warn!(
                "[knowledge] skipped extracted entry for '{}': {e}",
                entry.entity_name
            ),
        }
    }
    if saved > 0 {
        info!("[knowledge] saved {saved} extracted entries");
    }
    Ok(saved)
}
