// Checkpointing for the task graph: state is saved at every node boundary
// under the caller's thread id (usually the event id), so a crashed or
// paused run resumes from the last completed node. Two backends share one
// contract — an ephemeral in-memory map and the agent store.

use crate::atoms::error::EngineResult;
use crate::engine::store::AgentStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::TaskGraphState;

pub trait Checkpointer: Send + Sync {
    fn save(&self, thread_id: &str, state: &TaskGraphState) -> EngineResult<()>;
    fn load(&self, thread_id: &str) -> EngineResult<Option<TaskGraphState>>;
}

// ── In-memory backend ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointer {
    states: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn save(&self, thread_id: &str, state: &TaskGraphState) -> EngineResult<()> {
        let blob = serde_json::to_string(state)?;
        self.states.lock().insert(thread_id.to_string(), blob);
        Ok(())
    }

    fn load(&self, thread_id: &str) -> EngineResult<Option<TaskGraphState>> {
        match self.states.lock().get(thread_id) {
            Some(blob) => Ok(Some(serde_json::from_str(blob)?)),
            None => Ok(None),
        }
    }
}

// ── Store-backed backend ───────────────────────────────────────────────────

pub struct StoreCheckpointer {
    store: Arc<AgentStore>,
}

impl StoreCheckpointer {
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self { store }
    }
}

impl Checkpointer for StoreCheckpointer {
    fn save(&self, thread_id: &str, state: &TaskGraphState) -> EngineResult<()> {
        let blob = serde_json::to_string(state)?;
        self.store.save_checkpoint(thread_id, &blob)
    }

    fn load(&self, thread_id: &str) -> EngineResult<Option<TaskGraphState>> {
        match self.store.load_checkpoint(thread_id)? {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::taskgraph::{NextAction, TaskEventSnapshot};

    fn state() -> TaskGraphState {
        TaskGraphState::initial(
            TaskEventSnapshot {
                event_id: "e1".into(),
                title: "t".into(),
                description: "d".into(),
                requirements: String::new(),
                criteria: String::new(),
            },
            serde_json::json!({}),
        )
    }

    #[test]
    fn memory_checkpointer_round_trip() {
        let cp = MemoryCheckpointer::new();
        assert!(cp.load("t1").unwrap().is_none());
        let mut s = state();
        s.next_action = NextAction::Synthesize;
        cp.save("t1", &s).unwrap();
        let loaded = cp.load("t1").unwrap().unwrap();
        assert_eq!(loaded.next_action, NextAction::Synthesize);
    }

    #[test]
    fn store_checkpointer_round_trip() {
        let store = Arc::new(AgentStore::open_in_memory().unwrap());
        let cp = StoreCheckpointer::new(store);
        cp.save("t2", &state()).unwrap();
        assert!(cp.load("t2").unwrap().is_some());
    }
}
