// Eidolon Engine — module tree.
// The store owns every durable row; everything else is a facade over it,
// the tiered chat model, or both. The kernel wires the facades into the
// per-turn pipeline.

pub mod config;
pub mod emotion;
pub mod events;
pub mod expression;
pub mod intent;
pub mod kernel;
pub mod knowledge;
pub mod llm_json;
pub mod memory;
pub mod plugins;
pub mod prompts;
pub mod providers;
pub mod schedule;
pub mod store;
pub mod taskgraph;
pub mod world;
