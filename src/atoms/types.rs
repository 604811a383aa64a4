// ── Eidolon Atoms: Shared Wire Types ───────────────────────────────────────
// Types that cross module boundaries: chat messages as sent to the model
// router, and the model tier selector. Domain row types live next to the
// store modules that own them.

use serde::{Deserialize, Serialize};

// ── Chat messages ──────────────────────────────────────────────────────────

/// A single message in OpenAI-compatible wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// "system", "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

// ── Model tiers ────────────────────────────────────────────────────────────

/// Which model tier a call should be routed to.
/// Selection is always caller-driven — the router applies no heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Main conversation model: the reply generation and synthesis calls.
    Main,
    /// Lightweight model for classifiers, extraction and sub-agents.
    Tool,
    /// Multimodal model for vision / environment narration.
    Vision,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Main => "main",
            ModelTier::Tool => "tool",
            ModelTier::Vision => "vision",
        }
    }
}
