// Eidolon — a persistent role-play agent engine.
//
// The crate is a library: the host supplies I/O (CLI, GUI, channel bridge)
// and drives two entry points on [`AgentKernel`]:
//
//   • `chat(user_input) → reply` — the per-turn pipeline: knowledge
//     retrieval, environment/vision intents, schedule handling, plugin
//     context, layered memory, and the final Main-tier reply;
//   • `handle_event(event_id) → reply` — notification events get a single
//     explanation call, task events run the dynamic multi-agent task graph.
//
// Durable state lives in one SQLite database behind [`AgentStore`];
// the three model tiers (Main/Tool/Vision) sit behind [`ChatModel`].
//
// ```no_run
// use eidolon::{AgentKernel, AgentStore, ChatModel, ModelConfig};
// use eidolon::{CharacterProfile, EngineSettings, PluginRegistry, PromptLibrary};
// use std::sync::Arc;
//
// # async fn run() -> eidolon::EngineResult<()> {
// let store = Arc::new(AgentStore::open("agent.db")?);
// let kernel = AgentKernel::new(
//     store,
//     ChatModel::new(ModelConfig::from_env()),
//     PromptLibrary::from_env(),
//     PluginRegistry::new(),
//     CharacterProfile::from_env(),
//     EngineSettings::from_env(),
// );
// let reply = kernel.chat("你好呀").await?;
// # Ok(())
// # }
// ```

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{ChatMessage, ModelTier};
pub use engine::config::{CharacterProfile, EngineSettings};
pub use engine::emotion::EmotionAnalyzer;
pub use engine::events::{EventKind, EventManager};
pub use engine::expression::ExpressionStyleManager;
pub use engine::kernel::AgentKernel;
pub use engine::knowledge::{BaseKnowledge, KnowledgeGraph};
pub use engine::memory::LayeredMemory;
pub use engine::plugins::{Plugin, PluginContext, PluginOutput, PluginRegistry};
pub use engine::prompts::PromptLibrary;
pub use engine::providers::{ChatBackend, ChatModel, ModelConfig, TierConfig};
pub use engine::schedule::{
    CreateSchedule, ScheduleEngine, ScheduleKind, SchedulePriority,
};
pub use engine::store::AgentStore;
pub use engine::taskgraph::{
    Checkpointer, MemoryCheckpointer, StoreCheckpointer, TaskGraphEngine,
};
pub use engine::world::EnvironmentModel;
