// World model rows: environments (single described places), their visible
// objects, and domains (regions grouping environments many-to-many).
//
// Invariant: at most one environment is active. Activation clears every
// other is_active flag and sets the target inside one transaction, and
// verifies afterwards that exactly one row ended up active.

use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, AgentStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRow {
    pub uuid: String,
    pub name: String,
    pub overall_description: String,
    pub atmosphere: String,
    pub lighting: String,
    pub sounds: String,
    pub smells: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentObjectRow {
    pub uuid: String,
    pub environment_uuid: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRow {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub default_environment_uuid: Option<String>,
    pub created_at: String,
}

impl AgentStore {
    // ── Environments ──────────────────────────────────────────────────

    pub fn insert_environment(
        &self,
        name: &str,
        overall_description: &str,
        atmosphere: &str,
        lighting: &str,
        sounds: &str,
        smells: &str,
    ) -> EngineResult<EnvironmentRow> {
        let row = EnvironmentRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            overall_description: overall_description.to_string(),
            atmosphere: atmosphere.to_string(),
            lighting: lighting.to_string(),
            sounds: sounds.to_string(),
            smells: smells.to_string(),
            is_active: false,
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO environments
                 (uuid, name, overall_description, atmosphere, lighting, sounds,
                  smells, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            rusqlite::params![
                row.uuid,
                row.name,
                row.overall_description,
                row.atmosphere,
                row.lighting,
                row.sounds,
                row.smells,
                row.created_at
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EngineError::conflict(format!("environment '{}' already exists", row.name))
            }
            other => other.into(),
        })?;
        Ok(row)
    }

    pub fn get_environment(&self, uuid: &str) -> EngineResult<Option<EnvironmentRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT uuid, name, overall_description, atmosphere, lighting,
                        sounds, smells, is_active, created_at
                 FROM environments WHERE uuid = ?1",
                [uuid],
                Self::map_environment,
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    pub fn all_environments(&self) -> EngineResult<Vec<EnvironmentRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, overall_description, atmosphere, lighting,
                    sounds, smells, is_active, created_at
             FROM environments ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], Self::map_environment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn active_environment(&self) -> EngineResult<Option<EnvironmentRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT uuid, name, overall_description, atmosphere, lighting,
                        sounds, smells, is_active, created_at
                 FROM environments WHERE is_active = 1",
                [],
                Self::map_environment,
            )
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(row)
    }

    /// Activate one environment, deactivating all others transactionally.
    pub fn activate_environment(&self, uuid: &str) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE environments SET is_active = 0 WHERE is_active = 1", [])?;
        let n = tx.execute("UPDATE environments SET is_active = 1 WHERE uuid = ?1", [uuid])?;
        if n == 0 {
            return Err(EngineError::not_found(format!("environment {uuid}")));
        }
        let active: i64 =
            tx.query_row("SELECT COUNT(*) FROM environments WHERE is_active = 1", [], |r| {
                r.get(0)
            })?;
        if active != 1 {
            return Err(EngineError::conflict("environment activation race"));
        }
        tx.commit()?;
        Ok(())
    }

    fn map_environment(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnvironmentRow> {
        Ok(EnvironmentRow {
            uuid: row.get(0)?,
            name: row.get(1)?,
            overall_description: row.get(2)?,
            atmosphere: row.get(3)?,
            lighting: row.get(4)?,
            sounds: row.get(5)?,
            smells: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
            created_at: row.get(8)?,
        })
    }

    // ── Environment objects ───────────────────────────────────────────

    pub fn add_environment_object(
        &self,
        environment_uuid: &str,
        name: &str,
        description: &str,
    ) -> EngineResult<EnvironmentObjectRow> {
        let row = EnvironmentObjectRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            environment_uuid: environment_uuid.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO environment_objects (uuid, environment_uuid, name, description)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![row.uuid, row.environment_uuid, row.name, row.description],
        )?;
        Ok(row)
    }

    pub fn environment_objects(
        &self,
        environment_uuid: &str,
    ) -> EngineResult<Vec<EnvironmentObjectRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, environment_uuid, name, description
             FROM environment_objects WHERE environment_uuid = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([environment_uuid], |row| {
                Ok(EnvironmentObjectRow {
                    uuid: row.get(0)?,
                    environment_uuid: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Domains ───────────────────────────────────────────────────────

    pub fn insert_domain(
        &self,
        name: &str,
        description: &str,
        default_environment_uuid: Option<&str>,
    ) -> EngineResult<DomainRow> {
        let row = DomainRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description: description.to_string(),
            default_environment_uuid: default_environment_uuid.map(|s| s.to_string()),
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domains (uuid, name, description, default_environment_uuid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                row.uuid,
                row.name,
                row.description,
                row.default_environment_uuid,
                row.created_at
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EngineError::conflict(format!("domain '{}' already exists", row.name))
            }
            other => other.into(),
        })?;
        Ok(row)
    }

    pub fn all_domains(&self) -> EngineResult<Vec<DomainRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, description, default_environment_uuid, created_at
             FROM domains ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], Self::map_domain)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn link_environment_to_domain(
        &self,
        domain_uuid: &str,
        environment_uuid: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO domain_environments (domain_uuid, environment_uuid)
             VALUES (?1, ?2)",
            [domain_uuid, environment_uuid],
        )?;
        Ok(())
    }

    pub fn domains_for_environment(
        &self,
        environment_uuid: &str,
    ) -> EngineResult<Vec<DomainRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT d.uuid, d.name, d.description, d.default_environment_uuid, d.created_at
             FROM domains d
             JOIN domain_environments de ON de.domain_uuid = d.uuid
             WHERE de.environment_uuid = ?1 ORDER BY d.name",
        )?;
        let rows = stmt
            .query_map([environment_uuid], Self::map_domain)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn environments_for_domain(
        &self,
        domain_uuid: &str,
    ) -> EngineResult<Vec<EnvironmentRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.uuid, e.name, e.overall_description, e.atmosphere, e.lighting,
                    e.sounds, e.smells, e.is_active, e.created_at
             FROM environments e
             JOIN domain_environments de ON de.environment_uuid = e.uuid
             WHERE de.domain_uuid = ?1 ORDER BY e.name",
        )?;
        let rows = stmt
            .query_map([domain_uuid], Self::map_environment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_domain(row: &rusqlite::Row<'_>) -> rusqlite::Result<DomainRow> {
        Ok(DomainRow {
            uuid: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            default_environment_uuid: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

fn no_rows_to_none<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
