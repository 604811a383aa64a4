// Database schema and migrations for the Eidolon engine store.
// Called once at open after WAL is enabled. Adding a new table or column:
// append an idempotent CREATE TABLE IF NOT EXISTS or ALTER TABLE … ADD COLUMN
// (errors on existing columns are silently swallowed) at the end of
// run_migrations() — never modify existing SQL to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // ── Core tables ──────────────────────────────────────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at);

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- ═══ Knowledge: entity graph + base facts ═══

        CREATE TABLE IF NOT EXISTS entities (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_name
            ON entities(LOWER(name));

        CREATE TABLE IF NOT EXISTS definitions (
            entity_uuid TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'definition',
            source TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 1.0,
            priority INTEGER NOT NULL DEFAULT 50,
            is_base_knowledge INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (entity_uuid) REFERENCES entities(uuid) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS related_info (
            uuid TEXT PRIMARY KEY,
            entity_uuid TEXT NOT NULL,
            content TEXT NOT NULL,
            content_norm TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'related',
            source TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 0.8,
            status TEXT NOT NULL DEFAULT 'suspected',
            mention_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY (entity_uuid) REFERENCES entities(uuid) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_related_info_dedup
            ON related_info(entity_uuid, content_norm);

        CREATE TABLE IF NOT EXISTS base_facts (
            entity_name TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            description TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 1.0,
            priority INTEGER NOT NULL DEFAULT 100,
            immutable INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_base_facts_name
            ON base_facts(LOWER(entity_name));

        -- ═══ Layered memory: long-term summaries ═══

        CREATE TABLE IF NOT EXISTS summaries (
            uuid TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            rounds INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            ended_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_created
            ON summaries(created_at);

        -- ═══ Emotion snapshots (append-only) ═══

        CREATE TABLE IF NOT EXISTS emotion_snapshots (
            uuid TEXT PRIMARY KEY,
            relationship_type TEXT NOT NULL,
            emotional_tone TEXT NOT NULL,
            overall_score INTEGER NOT NULL,
            intimacy INTEGER NOT NULL,
            trust INTEGER NOT NULL,
            pleasure INTEGER NOT NULL,
            resonance INTEGER NOT NULL,
            dependence INTEGER NOT NULL,
            analysis_summary TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_emotion_created
            ON emotion_snapshots(created_at);

        -- ═══ World model: environments grouped into domains ═══

        CREATE TABLE IF NOT EXISTS environments (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            overall_description TEXT NOT NULL DEFAULT '',
            atmosphere TEXT NOT NULL DEFAULT '',
            lighting TEXT NOT NULL DEFAULT '',
            sounds TEXT NOT NULL DEFAULT '',
            smells TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_environments_name
            ON environments(LOWER(name));

        CREATE TABLE IF NOT EXISTS environment_objects (
            uuid TEXT PRIMARY KEY,
            environment_uuid TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (environment_uuid) REFERENCES environments(uuid) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS domains (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            default_environment_uuid TEXT,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_domains_name
            ON domains(LOWER(name));

        CREATE TABLE IF NOT EXISTS domain_environments (
            domain_uuid TEXT NOT NULL,
            environment_uuid TEXT NOT NULL,
            PRIMARY KEY (domain_uuid, environment_uuid),
            FOREIGN KEY (domain_uuid) REFERENCES domains(uuid) ON DELETE CASCADE,
            FOREIGN KEY (environment_uuid) REFERENCES environments(uuid) ON DELETE CASCADE
        );

        -- ═══ Schedules ═══

        CREATE TABLE IF NOT EXISTS schedules (
            schedule_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 2,
            weekday INTEGER,
            recurrence_pattern TEXT,
            generated_reason TEXT,
            involves_user INTEGER NOT NULL DEFAULT 0,
            collaboration_status TEXT NOT NULL DEFAULT 'none',
            is_queryable INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            source TEXT NOT NULL DEFAULT 'manual',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_window
            ON schedules(start_time, end_time);
        CREATE INDEX IF NOT EXISTS idx_schedules_collab
            ON schedules(collaboration_status, created_at DESC);

        -- ═══ Events ═══

        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 2,
            status TEXT NOT NULL DEFAULT 'pending',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_status
            ON events(status, created_at DESC);

        CREATE TABLE IF NOT EXISTS event_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            action TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (event_id) REFERENCES events(event_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_event_logs_event
            ON event_logs(event_id, ts);

        -- ═══ Expression styles ═══

        CREATE TABLE IF NOT EXISTS expression_styles (
            uuid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            expression TEXT NOT NULL,
            meaning TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'general',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expression_kind
            ON expression_styles(kind, created_at);
    ",
    )?;

    // ── Task checkpoints for the task graph engine ──────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS task_checkpoints (
            thread_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    ",
    )
    .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn in_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = in_memory_db();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "First migration run failed: {:?}", result);
    }

    #[test]
    fn migrations_idempotent() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "Second migration run failed: {:?}", result);
    }
}
