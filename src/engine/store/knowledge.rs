// Entity graph rows: entities, definitions, related info, base facts.
//
// Identity rules:
//   • Entities are unique by trimmed name, case-insensitive.
//   • A definition row is 0..1 per entity; base-knowledge definitions refuse
//     overwrite (EngineError::Immutable).
//   • Related info dedupes by (entity, whitespace-normalised content) —
//     a duplicate write bumps mention_count instead of inserting.
//   • Base facts are unique by name and never overwritten.

use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

use super::{normalize_content, normalize_name, now_rfc3339, AgentStore};

pub const STATUS_SUSPECTED: &str = "suspected";
pub const STATUS_CONFIRMED: &str = "confirmed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub uuid: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRow {
    pub entity_uuid: String,
    pub content: String,
    pub kind: String,
    pub source: String,
    pub confidence: f64,
    pub priority: i64,
    pub is_base_knowledge: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedInfoRow {
    pub uuid: String,
    pub entity_uuid: String,
    pub content: String,
    pub kind: String,
    pub source: String,
    pub confidence: f64,
    pub status: String,
    pub mention_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseFactRow {
    pub entity_name: String,
    pub content: String,
    pub category: String,
    pub description: String,
    pub confidence: f64,
    pub priority: i64,
    pub immutable: bool,
    pub created_at: String,
}

impl AgentStore {
    // ── Entities ──────────────────────────────────────────────────────

    /// Look an entity up by name, creating it if absent. Returns its uuid.
    pub fn find_or_create_entity(&self, name: &str) -> EngineResult<String> {
        if let Some(entity) = self.get_entity_by_name(name)? {
            return Ok(entity.uuid);
        }
        let now = now_rfc3339();
        let uuid = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entities (uuid, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![uuid, normalize_name(name), now],
        )?;
        Ok(uuid)
    }

    pub fn get_entity(&self, uuid: &str) -> EngineResult<Option<EntityRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT uuid, name, created_at, updated_at FROM entities WHERE uuid = ?1",
                [uuid],
                Self::map_entity,
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    /// Case-insensitive lookup by trimmed name.
    pub fn get_entity_by_name(&self, name: &str) -> EngineResult<Option<EntityRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT uuid, name, created_at, updated_at FROM entities
                 WHERE LOWER(name) = LOWER(?1)",
                [normalize_name(name)],
                Self::map_entity,
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    pub fn all_entities(&self) -> EngineResult<Vec<EntityRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, created_at, updated_at FROM entities ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], Self::map_entity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
        Ok(EntityRow {
            uuid: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    // ── Definitions ───────────────────────────────────────────────────

    /// Set (insert or overwrite) an entity's definition.
    /// Refuses to overwrite a base-knowledge definition unless the incoming
    /// row is itself base knowledge (the one-shot base persist path).
    pub fn set_definition(
        &self,
        entity_uuid: &str,
        content: &str,
        kind: &str,
        source: &str,
        confidence: f64,
        priority: i64,
        is_base_knowledge: bool,
    ) -> EngineResult<()> {
        let existing = self.get_definition(entity_uuid)?;
        if let Some(def) = &existing {
            if def.is_base_knowledge && !is_base_knowledge {
                return Err(EngineError::Immutable(format!(
                    "definition for entity {entity_uuid} is base knowledge"
                )));
            }
        }
        let now = now_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO definitions
                 (entity_uuid, content, kind, source, confidence, priority,
                  is_base_knowledge, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(entity_uuid) DO UPDATE SET
                 content = excluded.content,
                 kind = excluded.kind,
                 source = excluded.source,
                 confidence = excluded.confidence,
                 priority = excluded.priority,
                 is_base_knowledge = excluded.is_base_knowledge,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                entity_uuid,
                content,
                kind,
                source,
                confidence,
                priority,
                is_base_knowledge as i64,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_definition(&self, entity_uuid: &str) -> EngineResult<Option<DefinitionRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT entity_uuid, content, kind, source, confidence, priority,
                        is_base_knowledge, created_at, updated_at
                 FROM definitions WHERE entity_uuid = ?1",
                [entity_uuid],
                |row| {
                    Ok(DefinitionRow {
                        entity_uuid: row.get(0)?,
                        content: row.get(1)?,
                        kind: row.get(2)?,
                        source: row.get(3)?,
                        confidence: row.get(4)?,
                        priority: row.get(5)?,
                        is_base_knowledge: row.get::<_, i64>(6)? != 0,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    // ── Related info ──────────────────────────────────────────────────

    /// Add related info, or bump mention_count when the same content already
    /// exists for this entity. Returns the row after the write.
    pub fn add_or_increment_related_info(
        &self,
        entity_uuid: &str,
        content: &str,
        kind: &str,
        source: &str,
        confidence: f64,
        status: &str,
    ) -> EngineResult<RelatedInfoRow> {
        let norm = normalize_content(content);
        let now = now_rfc3339();
        let uuid = uuid::Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO related_info
                     (uuid, entity_uuid, content, content_norm, kind, source,
                      confidence, status, mention_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)
                 ON CONFLICT(entity_uuid, content_norm) DO UPDATE SET
                     mention_count = mention_count + 1",
                rusqlite::params![
                    uuid, entity_uuid, content, norm, kind, source, confidence, status, now
                ],
            )?;
        }
        // Re-read so the caller sees the post-increment row.
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT uuid, entity_uuid, content, kind, source, confidence, status,
                    mention_count, created_at
             FROM related_info WHERE entity_uuid = ?1 AND content_norm = ?2",
            rusqlite::params![entity_uuid, norm],
            Self::map_related_info,
        )?;
        Ok(row)
    }

    /// Related info for one entity: confirmed first, then suspected,
    /// each newest-first.
    pub fn related_info_for(&self, entity_uuid: &str) -> EngineResult<Vec<RelatedInfoRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, entity_uuid, content, kind, source, confidence, status,
                    mention_count, created_at
             FROM related_info WHERE entity_uuid = ?1
             ORDER BY CASE status WHEN 'confirmed' THEN 0 ELSE 1 END,
                      created_at DESC",
        )?;
        let rows = stmt
            .query_map([entity_uuid], Self::map_related_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_related_info_status(&self, info_uuid: &str, status: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE related_info SET status = ?2 WHERE uuid = ?1",
            [info_uuid, status],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!("related info {info_uuid}")));
        }
        Ok(())
    }

    fn map_related_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<RelatedInfoRow> {
        Ok(RelatedInfoRow {
            uuid: row.get(0)?,
            entity_uuid: row.get(1)?,
            content: row.get(2)?,
            kind: row.get(3)?,
            source: row.get(4)?,
            confidence: row.get(5)?,
            status: row.get(6)?,
            mention_count: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    // ── Base facts ────────────────────────────────────────────────────

    /// Insert a base fact. Refuses when a fact already exists for this name.
    pub fn insert_base_fact(
        &self,
        entity_name: &str,
        content: &str,
        category: &str,
        description: &str,
    ) -> EngineResult<BaseFactRow> {
        if self.get_base_fact(entity_name)?.is_some() {
            return Err(EngineError::Immutable(format!(
                "base fact for '{entity_name}' already exists"
            )));
        }
        let row = BaseFactRow {
            entity_name: normalize_name(entity_name),
            content: content.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            confidence: 1.0,
            priority: 100,
            immutable: true,
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO base_facts
                 (entity_name, content, category, description, confidence,
                  priority, immutable, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            rusqlite::params![
                row.entity_name,
                row.content,
                row.category,
                row.description,
                row.confidence,
                row.priority,
                row.created_at
            ],
        )?;
        Ok(row)
    }

    /// Exact-then-case-insensitive lookup. The unique index is already
    /// case-insensitive, so a single LOWER() comparison covers both.
    pub fn get_base_fact(&self, entity_name: &str) -> EngineResult<Option<BaseFactRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT entity_name, content, category, description, confidence,
                        priority, immutable, created_at
                 FROM base_facts WHERE LOWER(entity_name) = LOWER(?1)",
                [normalize_name(entity_name)],
                |row| {
                    Ok(BaseFactRow {
                        entity_name: row.get(0)?,
                        content: row.get(1)?,
                        category: row.get(2)?,
                        description: row.get(3)?,
                        confidence: row.get(4)?,
                        priority: row.get(5)?,
                        immutable: row.get::<_, i64>(6)? != 0,
                        created_at: row.get(7)?,
                    })
                },
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    pub fn all_base_facts(&self) -> EngineResult<Vec<BaseFactRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entity_name, content, category, description, confidence,
                    priority, immutable, created_at
             FROM base_facts ORDER BY category, entity_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BaseFactRow {
                    entity_name: row.get(0)?,
                    content: row.get(1)?,
                    category: row.get(2)?,
                    description: row.get(3)?,
                    confidence: row.get(4)?,
                    priority: row.get(5)?,
                    immutable: row.get::<_, i64>(6)? != 0,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn no_rows_to_none<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
