// Eidolon Engine — World Model
// Environments are single described places; domains group them into regions
// ("home", "school") with a default environment so "go to <domain>" has a
// concrete target. Exactly one environment is active at a time (enforced
// transactionally by the store).
//
// Two perception paths feed the chat pipeline:
//   • switch intent — movement phrasing plus a named environment/domain,
//     gated by a Tool-tier confirmation before any state changes;
//   • vision context — perception phrasing produces either a domain-level
//     answer (low precision: "我在小可家") or an environment-level answer
//     with the visible objects (high precision).

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::{AgentStore, DomainRow, EnvironmentObjectRow, EnvironmentRow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Keyword sets ───────────────────────────────────────────────────────────

const MOVEMENT_KEYWORDS: &[&str] = &[
    "去", "到", "前往", "回", "走到", "过去", "出发", "搬到", "come to", "go to", "head to",
    "move to",
];

const PERCEPTION_KEYWORDS: &[&str] = &[
    "看", "周围", "环境", "哪里", "在哪", "什么地方", "能看到", "附近", "身边", "房间里",
    "where", "around", "see", "surroundings",
];

const HIGH_PRECISION_KEYWORDS: &[&str] = &[
    "周围有什么", "有哪些", "能看到什么", "细节", "具体", "什么东西", "看看", "描述一下",
    "what can you see", "describe",
];

const LOW_PRECISION_KEYWORDS: &[&str] =
    &["你在哪", "在哪里", "什么地方", "在哪儿", "where are you"];

// ── Result types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchIntent {
    pub from_env: Option<EnvironmentRow>,
    pub to_env: EnvironmentRow,
    pub can_switch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionContext {
    pub environment: EnvironmentRow,
    pub domain: Option<DomainRow>,
    pub objects: Vec<EnvironmentObjectRow>,
    pub object_count: usize,
    pub high_precision: bool,
}

#[derive(Debug, Deserialize)]
struct SwitchConfirmation {
    wants_switch: bool,
}

#[derive(Debug, Deserialize)]
struct PrecisionReply {
    high_precision: bool,
}

// ── The model ──────────────────────────────────────────────────────────────

pub struct EnvironmentModel {
    store: Arc<AgentStore>,
    chat: ChatModel,
}

impl EnvironmentModel {
    pub fn new(store: Arc<AgentStore>, chat: ChatModel) -> Self {
        Self { store, chat }
    }

    pub fn active_environment(&self) -> EngineResult<Option<EnvironmentRow>> {
        self.store.active_environment()
    }

    /// Switch the active environment (single-active invariant in the store).
    pub fn switch(&self, env_uuid: &str) -> EngineResult<EnvironmentRow> {
        self.store.activate_environment(env_uuid)?;
        let env = self
            .store
            .get_environment(env_uuid)?
            .ok_or_else(|| EngineError::not_found(format!("environment {env_uuid}")))?;
        info!("[world] switched active environment to '{}'", env.name);
        Ok(env)
    }

    // ── Switch intent ─────────────────────────────────────────────────

    /// Detect "move to X" phrasing. The target must name a known environment
    /// or domain; a Tool-tier confirmation gates the final verdict. Returns
    /// None when there is no movement phrasing, no named target, or the
    /// confirmation declines / fails.
    pub async fn detect_switch_intent(&self, user_input: &str) -> EngineResult<Option<SwitchIntent>> {
        if !contains_any(user_input, MOVEMENT_KEYWORDS) {
            return Ok(None);
        }

        let active = self.store.active_environment()?;
        let Some(target) = self.resolve_named_target(user_input, active.as_ref())? else {
            return Ok(None);
        };

        if !self.confirm_switch(user_input, &target.name).await {
            return Ok(None);
        }

        Ok(Some(SwitchIntent { from_env: active, to_env: target, can_switch: true }))
    }

    /// Match environment names first, then domain names (a domain resolves
    /// to its default environment). The currently active environment is
    /// never a target.
    fn resolve_named_target(
        &self,
        user_input: &str,
        active: Option<&EnvironmentRow>,
    ) -> EngineResult<Option<EnvironmentRow>> {
        for env in self.store.all_environments()? {
            if user_input.contains(&env.name) && active.map(|a| a.uuid != env.uuid).unwrap_or(true)
            {
                return Ok(Some(env));
            }
        }
        for domain in self.store.all_domains()? {
            if !user_input.contains(&domain.name) {
                continue;
            }
            if let Some(default_uuid) = &domain.default_environment_uuid {
                if let Some(env) = self.store.get_environment(default_uuid)? {
                    if active.map(|a| a.uuid != env.uuid).unwrap_or(true) {
                        return Ok(Some(env));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn confirm_switch(&self, user_input: &str, target_name: &str) -> bool {
        let prompt = format!(
            "用户说：\"{user_input}\"\n\n\
             请判断用户是否想让角色移动到「{target_name}」。\n\
             请以JSON格式回答（只返回JSON）：{{\"wants_switch\": true}}"
        );
        let request = [
            ChatMessage::system("你是一个意图判断助手，只返回JSON格式数据。"),
            ChatMessage::user(prompt),
        ];
        match self.chat.chat(&request, ModelTier::Tool).await {
            Ok(reply) => llm_json::parse_strict::<SwitchConfirmation>(&reply)
                .map(|c| c.wants_switch)
                .unwrap_or(false),
            Err(e) => {
                warn!("[world] switch confirmation failed, treating as no intent: {e}");
                false
            }
        }
    }

    // ── Vision ────────────────────────────────────────────────────────

    /// Perception-triggered context about the current location. None when
    /// the input carries no perception phrasing or no environment is active.
    pub async fn vision_context(&self, user_input: &str) -> EngineResult<Option<VisionContext>> {
        if !contains_any(user_input, PERCEPTION_KEYWORDS) {
            return Ok(None);
        }
        let Some(environment) = self.store.active_environment()? else {
            return Ok(None);
        };

        let high_precision = self.detect_precision(user_input).await;
        let domain = self
            .store
            .domains_for_environment(&environment.uuid)?
            .into_iter()
            .next();
        let objects = if high_precision {
            self.store.environment_objects(&environment.uuid)?
        } else {
            Vec::new()
        };
        let object_count = objects.len();

        Ok(Some(VisionContext { environment, domain, objects, object_count, high_precision }))
    }

    /// Keyword heuristics first; ambiguous inputs go to Tool-tier
    /// arbitration whose neutral value is low precision.
    pub async fn detect_precision(&self, user_input: &str) -> bool {
        if contains_any(user_input, HIGH_PRECISION_KEYWORDS) {
            return true;
        }
        if contains_any(user_input, LOW_PRECISION_KEYWORDS) {
            return false;
        }

        let prompt = format!(
            "用户问：\"{user_input}\"\n\n\
             用户是想要具体的环境细节描述（high_precision=true），\
             还是只想知道大概位置（high_precision=false）？\n\
             请以JSON格式回答（只返回JSON）：{{\"high_precision\": false}}"
        );
        let request = [
            ChatMessage::system("你是一个查询精度判断助手，只返回JSON格式数据。"),
            ChatMessage::user(prompt),
        ];
        match self.chat.chat(&request, ModelTier::Tool).await {
            Ok(reply) => llm_json::parse_strict::<PrecisionReply>(&reply)
                .map(|p| p.high_precision)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Render the vision context as a system block.
    pub fn vision_prompt_block(ctx: &VisionContext) -> String {
        if !ctx.high_precision {
            // Domain-level answer: abstract location only.
            let place = ctx
                .domain
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| ctx.environment.name.clone());
            return format!(
                "【当前位置】\n你现在在「{place}」。用户只想知道大概位置，回答位置即可，不必展开细节。"
            );
        }

        let mut parts = vec![
            "【当前环境感知】".to_string(),
            format!("所在环境：{}", ctx.environment.name),
            format!("整体描述：{}", ctx.environment.overall_description),
        ];
        if !ctx.environment.atmosphere.is_empty() {
            parts.push(format!("氛围：{}", ctx.environment.atmosphere));
        }
        if !ctx.environment.lighting.is_empty() {
            parts.push(format!("光线：{}", ctx.environment.lighting));
        }
        if !ctx.environment.sounds.is_empty() {
            parts.push(format!("声音：{}", ctx.environment.sounds));
        }
        if !ctx.environment.smells.is_empty() {
            parts.push(format!("气味：{}", ctx.environment.smells));
        }
        if !ctx.objects.is_empty() {
            parts.push("可见物体：".to_string());
            for obj in &ctx.objects {
                if obj.description.is_empty() {
                    parts.push(format!("  • {}", obj.name));
                } else {
                    parts.push(format!("  • {}：{}", obj.name, obj.description));
                }
            }
        }
        parts.push("请基于以上环境信息，以第一人称自然地描述你所看到的。".to_string());
        parts.join("\n")
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}
