// Eidolon Engine — Event Manager
// A thin facade over the event rows: hosts create events, the kernel
// transitions them through pending → processing → completed/failed and
// appends log entries along the way. Task events carry their requirements
// and completion criteria in the metadata JSON.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::store::{
    AgentStore, EventRow, EVENT_NOTIFICATION, EVENT_TASK, STATUS_COMPLETED, STATUS_FAILED,
    STATUS_PENDING, STATUS_PROCESSING,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Notification,
    Task,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Notification => EVENT_NOTIFICATION,
            EventKind::Task => EVENT_TASK,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            EVENT_NOTIFICATION => Some(EventKind::Notification),
            EVENT_TASK => Some(EventKind::Task),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct EventManager {
    store: Arc<AgentStore>,
}

impl EventManager {
    pub fn new(store: Arc<AgentStore>) -> Self {
        Self { store }
    }

    /// Create a notification event (title/description payload only).
    pub fn create_notification(
        &self,
        title: &str,
        description: &str,
        priority: i64,
    ) -> EngineResult<EventRow> {
        self.store
            .insert_event(title, description, EVENT_NOTIFICATION, priority, json!({}))
    }

    /// Create a task event carrying requirements and completion criteria.
    pub fn create_task(
        &self,
        title: &str,
        description: &str,
        priority: i64,
        requirements: &str,
        criteria: &str,
    ) -> EngineResult<EventRow> {
        self.store.insert_event(
            title,
            description,
            EVENT_TASK,
            priority,
            json!({
                "task_requirements": requirements,
                "completion_criteria": criteria,
            }),
        )
    }

    pub fn get(&self, event_id: &str) -> EngineResult<EventRow> {
        self.store
            .get_event(event_id)?
            .ok_or_else(|| EngineError::not_found(format!("event {event_id}")))
    }

    pub fn list(&self) -> EngineResult<Vec<EventRow>> {
        self.store.list_events()
    }

    pub fn mark_processing(&self, event_id: &str, note: &str) -> EngineResult<()> {
        self.store.update_event_status(event_id, STATUS_PROCESSING, note)
    }

    pub fn mark_completed(&self, event_id: &str, note: &str) -> EngineResult<()> {
        self.store.update_event_status(event_id, STATUS_COMPLETED, note)
    }

    pub fn mark_failed(&self, event_id: &str, note: &str) -> EngineResult<()> {
        self.store.update_event_status(event_id, STATUS_FAILED, note)
    }

    pub fn append_log(&self, event_id: &str, action: &str, content: &str) -> EngineResult<()> {
        self.store.append_event_log(event_id, action, content)
    }

    /// Merge keys into the event's metadata (e.g. collaboration logs after
    /// a task graph run).
    pub fn merge_metadata(&self, event_id: &str, patch: Value) -> EngineResult<()> {
        self.store.merge_event_metadata(event_id, patch)
    }

    pub fn statistics(&self) -> EngineResult<EventStats> {
        let events = self.store.list_events()?;
        let mut stats = EventStats { total: events.len(), ..Default::default() };
        for event in &events {
            match event.status.as_str() {
                STATUS_PENDING => stats.pending += 1,
                STATUS_PROCESSING => stats.processing += 1,
                STATUS_COMPLETED => stats.completed += 1,
                STATUS_FAILED => stats.failed += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}
