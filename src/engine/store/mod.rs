// Eidolon Engine — Agent Store
// Every durable row the engine owns lives in one SQLite database behind this
// store. Facade modules (memory, knowledge graph, schedules, world, events)
// hold no state of their own — they call typed operations here.
//
// Module layout:
//   schema      — idempotent migrations, run once at open
//   messages    — short-term message log + metadata key/value counters
//   knowledge   — entities, definitions, related info, base facts
//   summaries   — long-term topic summaries + archival transaction
//   emotion     — append-only emotion snapshots
//   world       — environments, objects, domains, single-active invariant
//   schedules   — schedule CRUD, range query, soft delete
//   events      — event CRUD, status transitions, log append
//   expression  — agent/user expression style rows
//   checkpoints — task-graph state blobs keyed by thread id

use crate::atoms::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

mod checkpoints;
mod emotion;
mod events;
mod expression;
mod knowledge;
mod messages;
mod schedules;
mod schema;
mod summaries;
mod world;

pub use emotion::EmotionSnapshotRow;
pub use events::{
    EventLogRow, EventRow, EVENT_NOTIFICATION, EVENT_TASK, STATUS_COMPLETED, STATUS_FAILED,
    STATUS_PENDING, STATUS_PROCESSING,
};
pub use expression::{ExpressionRow, EXPR_AGENT, EXPR_USER};
pub use knowledge::{
    BaseFactRow, DefinitionRow, EntityRow, RelatedInfoRow, STATUS_CONFIRMED, STATUS_SUSPECTED,
};
pub use messages::StoredMessage;
pub use schedules::{
    ScheduleRow, COLLAB_ACCEPTED, COLLAB_DECLINED, COLLAB_NONE, COLLAB_PENDING, KIND_APPOINTMENT,
    KIND_RECURRING, KIND_TEMPORARY,
};
pub use summaries::SummaryRow;
pub use world::{DomainRow, EnvironmentObjectRow, EnvironmentRow};

/// Thread-safe database wrapper.
pub struct AgentStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for integration tests that need raw access.
    pub conn: Mutex<Connection>,
}

impl AgentStore {
    /// Open (or create) the engine database at `path` and initialize tables.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("[store] Opening agent store at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

        schema::run_migrations(&conn)?;

        Ok(AgentStore { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database with the full schema. Used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(AgentStore { conn: Mutex::new(conn) })
    }
}

/// Initialise an already-open connection with the full schema.
/// Used by integration tests that create their own connections.
pub fn schema_for_testing(conn: &Connection) {
    schema::run_migrations(conn).expect("schema_for_testing: migrations failed");
}

/// Normalise an entity or fact name for identity comparison:
/// trimmed, original case preserved (lookups lowercase on their own).
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_string()
}

/// Normalise free-text content for duplicate detection:
/// trimmed and whitespace-collapsed.
pub(crate) fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Current timestamp in RFC 3339, the format every row stores.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_open_runs_migrations() {
        let store = AgentStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in [
            "messages",
            "metadata",
            "entities",
            "definitions",
            "related_info",
            "base_facts",
            "summaries",
            "emotion_snapshots",
            "environments",
            "domains",
            "schedules",
            "events",
            "expression_styles",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn normalize_content_collapses_whitespace() {
        assert_eq!(normalize_content("  喜欢   看书 \n"), "喜欢 看书");
    }
}
