// Eidolon Engine — Tiered Chat Model Router
// Three named tiers {Main, Tool, Vision}, each with its own model name,
// temperature and token budget. Selection is caller-driven — classifiers and
// sub-agents ask for Tool, the reply and synthesis calls ask for Main,
// environment narration may ask for Vision. The router applies no heuristics.
//
// Transport is behind the ChatBackend trait so tests inject a scripted
// backend; the production backend speaks the OpenAI-compatible
// /chat/completions wire format.

pub mod openai;

pub use openai::OpenAiCompatibleBackend;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, ModelTier};
use async_trait::async_trait;
use log::debug;
use std::env;
use std::sync::Arc;

// ── Tier configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_url: String,
    pub api_key: String,
    pub main: TierConfig,
    pub tool: TierConfig,
    pub vision: TierConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl ModelConfig {
    /// Read the tier configuration from the environment.
    /// The main tier honours the legacy MODEL_NAME / TEMPERATURE / MAX_TOKENS
    /// variables as fallbacks.
    pub fn from_env() -> Self {
        let legacy_model = env_or("MODEL_NAME", "Qwen/Qwen2.5-7B-Instruct");
        ModelConfig {
            api_url: env_or("LLM_API_URL", "https://api.siliconflow.cn/v1/chat/completions"),
            api_key: env_or("LLM_API_KEY", ""),
            main: TierConfig {
                model: env_or("MAIN_MODEL_NAME", &legacy_model),
                temperature: env_f64("MAIN_MODEL_TEMPERATURE", env_f64("TEMPERATURE", 0.8)),
                max_tokens: env_u32("MAIN_MODEL_MAX_TOKENS", env_u32("MAX_TOKENS", 2000)),
            },
            tool: TierConfig {
                model: env_or("TOOL_MODEL_NAME", &legacy_model),
                temperature: env_f64("TOOL_MODEL_TEMPERATURE", 0.3),
                max_tokens: env_u32("TOOL_MODEL_MAX_TOKENS", 500),
            },
            vision: TierConfig {
                model: env_or("VISION_MODEL_NAME", &legacy_model),
                temperature: env_f64("VISION_MODEL_TEMPERATURE", 0.5),
                max_tokens: env_u32("VISION_MODEL_MAX_TOKENS", 1000),
            },
        }
    }

    pub fn tier(&self, tier: ModelTier) -> &TierConfig {
        match tier {
            ModelTier::Main => &self.main,
            ModelTier::Tool => &self.tool,
            ModelTier::Vision => &self.vision,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != "your-api-key"
    }
}

// ── Backend trait ──────────────────────────────────────────────────────────

/// One non-streaming chat completion. Implementations own transport,
/// retries and error classification; failures surface as
/// `EngineError::Upstream` with the original message.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tier: &TierConfig,
    ) -> EngineResult<String>;
}

// ── The router ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatModel {
    backend: Arc<dyn ChatBackend>,
    config: Arc<ModelConfig>,
}

impl ChatModel {
    /// Production router over the OpenAI-compatible HTTP backend.
    pub fn new(config: ModelConfig) -> Self {
        let backend = Arc::new(OpenAiCompatibleBackend::new(&config));
        Self { backend, config: Arc::new(config) }
    }

    /// Router with an injected backend (tests, alternative transports).
    pub fn with_backend(config: ModelConfig, backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend, config: Arc::new(config) }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Route a chat request to the given tier and return the reply text.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tier: ModelTier,
    ) -> EngineResult<String> {
        let cfg = self.config.tier(tier);
        debug!(
            "[providers] chat tier={} model={} messages={}",
            tier.as_str(),
            cfg.model,
            messages.len()
        );
        self.backend.complete(messages, cfg).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted backend for tests: pops canned replies in order, or fails.

    use super::*;
    use parking_lot::Mutex;

    pub enum Scripted {
        Reply(String),
        Fail(String),
    }

    pub struct ScriptedBackend {
        script: Mutex<Vec<Scripted>>,
        pub calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Scripted>) -> Self {
            Self { script: Mutex::new(script), calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tier: &TierConfig,
        ) -> EngineResult<String> {
            self.calls
                .lock()
                .push((tier.model.clone(), messages.to_vec()));
            let mut script = self.script.lock();
            let next = if script.len() > 1 { script.remove(0) } else {
                // Keep the last entry as the standing answer.
                match script.first() {
                    Some(Scripted::Reply(r)) => Scripted::Reply(r.clone()),
                    Some(Scripted::Fail(e)) => Scripted::Fail(e.clone()),
                    None => Scripted::Fail("script exhausted".into()),
                }
            };
            match next {
                Scripted::Reply(r) => Ok(r),
                Scripted::Fail(e) => Err(crate::atoms::error::EngineError::upstream(e)),
            }
        }
    }

    pub fn test_config() -> ModelConfig {
        ModelConfig {
            api_url: "http://localhost/unused".into(),
            api_key: "test".into(),
            main: TierConfig { model: "main-model".into(), temperature: 0.8, max_tokens: 2000 },
            tool: TierConfig { model: "tool-model".into(), temperature: 0.3, max_tokens: 500 },
            vision: TierConfig { model: "vision-model".into(), temperature: 0.5, max_tokens: 1000 },
        }
    }

    pub fn scripted_model(script: Vec<Scripted>) -> (ChatModel, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(script));
        (ChatModel::with_backend(test_config(), backend.clone()), backend)
    }
}
