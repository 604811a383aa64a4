// Eidolon Engine — Plugin Invoker
// Plugins are externally registered context providers consulted during the
// understanding phase. Selection asks the Tool model which registered
// plugins are relevant to the user's message; the reply may name plugins by
// id or 1-based index, comma- or Chinese-comma-separated, or "无"/"none"
// for nothing. A transport failure degrades to substring keyword matching.
// Every selected plugin runs; its context lines are concatenated prefixed
// by the plugin name.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::providers::ChatModel;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── The plugin contract ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginContext {
    pub user_input: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginOutput {
    /// Context text offered to the reply prompt; empty means nothing useful.
    pub context: String,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn tool_id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn keywords(&self) -> &[String];
    fn enabled(&self) -> bool {
        true
    }
    async fn invoke(&self, ctx: &PluginContext) -> EngineResult<PluginOutput>;
}

/// The host-supplied registry view.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn list(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn enabled(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.iter().filter(|p| p.enabled()).cloned().collect()
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.tool_id() == tool_id).cloned()
    }
}

// ── Invocation result ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PluginInvocation {
    pub tool_id: String,
    pub name: String,
    pub success: bool,
    pub context: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginContextResult {
    pub invoked: Vec<PluginInvocation>,
    pub context_info: String,
}

impl PluginContextResult {
    pub fn has_context(&self) -> bool {
        !self.context_info.is_empty()
    }
}

// ── The invoker ────────────────────────────────────────────────────────────

pub struct PluginInvoker {
    registry: PluginRegistry,
    chat: ChatModel,
}

impl PluginInvoker {
    pub fn new(registry: PluginRegistry, chat: ChatModel) -> Self {
        Self { registry, chat }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Select and run the plugins relevant to the input.
    pub async fn invoke_relevant(&self, user_input: &str) -> PluginContextResult {
        let enabled = self.registry.enabled();
        if enabled.is_empty() {
            return PluginContextResult::default();
        }

        let relevant_ids = match self.judge_relevance(user_input, &enabled).await {
            Some(ids) => ids,
            None => Self::keyword_match(user_input, &enabled),
        };
        if relevant_ids.is_empty() {
            return PluginContextResult::default();
        }

        let mut invoked = Vec::new();
        let mut context_parts = Vec::new();
        for tool_id in relevant_ids {
            let Some(plugin) = self.registry.get(&tool_id) else { continue };
            if !plugin.enabled() {
                continue;
            }
            info!("[plugins] invoking '{}'", plugin.name());
            match plugin
                .invoke(&PluginContext { user_input: user_input.to_string() })
                .await
            {
                Ok(output) => {
                    if !output.context.is_empty() {
                        context_parts.push(format!("[{}] {}", plugin.name(), output.context));
                    }
                    invoked.push(PluginInvocation {
                        tool_id: plugin.tool_id().to_string(),
                        name: plugin.name().to_string(),
                        success: true,
                        context: output.context,
                    });
                }
                Err(e) => {
                    warn!("[plugins] '{}' failed: {e}", plugin.name());
                    invoked.push(PluginInvocation {
                        tool_id: plugin.tool_id().to_string(),
                        name: plugin.name().to_string(),
                        success: false,
                        context: String::new(),
                    });
                }
            }
        }

        PluginContextResult { invoked, context_info: context_parts.join("\n") }
    }

    /// Wrap the aggregated context as a system block.
    pub fn format_prompt_block(context_info: &str) -> String {
        format!(
            "【工具信息】\n以下是通过工具获取的实时信息，请在回复中参考使用：\n{context_info}"
        )
    }

    // ── Relevance ─────────────────────────────────────────────────────

    /// Ask the Tool model which plugins matter. None means "no usable
    /// signal" (fall back to keywords); an empty Vec means "none relevant".
    async fn judge_relevance(
        &self,
        user_input: &str,
        plugins: &[Arc<dyn Plugin>],
    ) -> Option<Vec<String>> {
        let tools_list: String = plugins
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}: {} - {}\n", i + 1, p.tool_id(), p.name(), p.description()))
            .collect();

        let prompt = format!(
            "请判断以下用户消息是否需要获取额外信息来回答。\n\n\
             用户消息：\"{user_input}\"\n\n\
             可用的信息获取工具：\n{tools_list}\n\
             请分析用户消息的意图，判断需要调用哪些工具来获取有助于回答的信息。\n\
             如果需要调用工具，请输出工具的编号（如：1）或ID（如：systime），多个用逗号分隔。\n\
             如果不需要任何工具，请输出\"无\"。\n\n\
             注意：只有当用户消息明确或隐含需要某种特定信息时才调用相应工具；\
             普通的闲聊不需要调用任何工具。\n\n\
             请直接输出结果："
        );

        match self.chat.chat(&[ChatMessage::user(prompt)], ModelTier::Tool).await {
            Ok(reply) => Some(Self::parse_relevance_reply(&reply, plugins)),
            Err(e) => {
                warn!("[plugins] relevance call failed, falling back to keywords: {e}");
                None
            }
        }
    }

    /// Accepts comma/Chinese-comma separated tokens: tool ids
    /// (case-insensitive) or 1-based indices. "无"/"none"/empty → nothing.
    fn parse_relevance_reply(reply: &str, plugins: &[Arc<dyn Plugin>]) -> Vec<String> {
        let reply = reply.trim();
        if reply.is_empty() || reply == "无" || reply.eq_ignore_ascii_case("none") {
            return Vec::new();
        }

        let mut relevant = Vec::new();
        for part in reply.replace('，', ",").split(',') {
            let token = part.trim();
            if token.is_empty() {
                continue;
            }
            // Tool id match first.
            if let Some(plugin) =
                plugins.iter().find(|p| p.tool_id().eq_ignore_ascii_case(token))
            {
                if !relevant.contains(&plugin.tool_id().to_string()) {
                    relevant.push(plugin.tool_id().to_string());
                }
                continue;
            }
            // Then a 1-based index.
            if let Ok(index) = token.parse::<usize>() {
                if index >= 1 {
                    if let Some(plugin) = plugins.get(index - 1) {
                        if !relevant.contains(&plugin.tool_id().to_string()) {
                            relevant.push(plugin.tool_id().to_string());
                        }
                    }
                }
            }
        }
        relevant
    }

    fn keyword_match(user_input: &str, plugins: &[Arc<dyn Plugin>]) -> Vec<String> {
        let lower = user_input.to_lowercase();
        plugins
            .iter()
            .filter(|p| p.keywords().iter().any(|k| lower.contains(&k.to_lowercase())))
            .map(|p| p.tool_id().to_string())
            .collect()
    }
}
