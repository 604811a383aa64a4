// Expression style rows: the agent's curated quirks (kind=agent) and the
// user's learned habits (kind=user).

use crate::atoms::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

use super::{normalize_content, now_rfc3339, AgentStore};

pub const EXPR_AGENT: &str = "agent";
pub const EXPR_USER: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionRow {
    pub uuid: String,
    pub kind: String,
    pub expression: String,
    pub meaning: String,
    pub category: String,
    pub created_at: String,
}

impl AgentStore {
    /// Insert an expression. Re-adding the same expression text for the same
    /// kind is a no-op returning the existing row.
    pub fn insert_expression(
        &self,
        kind: &str,
        expression: &str,
        meaning: &str,
        category: &str,
    ) -> EngineResult<ExpressionRow> {
        let norm = normalize_content(expression);
        if let Some(existing) = self
            .expressions_by_kind(kind)?
            .into_iter()
            .find(|e| normalize_content(&e.expression) == norm)
        {
            return Ok(existing);
        }
        let row = ExpressionRow {
            uuid: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            expression: expression.to_string(),
            meaning: meaning.to_string(),
            category: category.to_string(),
            created_at: now_rfc3339(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO expression_styles (uuid, kind, expression, meaning, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![row.uuid, row.kind, row.expression, row.meaning, row.category, row.created_at],
        )?;
        Ok(row)
    }

    pub fn expressions_by_kind(&self, kind: &str) -> EngineResult<Vec<ExpressionRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, kind, expression, meaning, category, created_at
             FROM expression_styles WHERE kind = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map([kind], |row| {
                Ok(ExpressionRow {
                    uuid: row.get(0)?,
                    kind: row.get(1)?,
                    expression: row.get(2)?,
                    meaning: row.get(3)?,
                    category: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_expression(&self, uuid: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM expression_styles WHERE uuid = ?1", [uuid])?;
        if n == 0 {
            return Err(EngineError::not_found(format!("expression {uuid}")));
        }
        Ok(())
    }

    pub fn clear_expressions(&self, kind: &str) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM expression_styles WHERE kind = ?1", [kind])?;
        Ok(n)
    }
}
