// ── Eidolon Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Upstream, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Classifier failures never surface here — classifiers degrade to their
//     neutral value; only the strict-parse paths raise `BadInput`.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Missing row by id or name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempt to rewrite a base-knowledge row or re-add an existing base fact.
    #[error("Immutable: {0}")]
    Immutable(String),

    /// Unique-name collision, undismissed schedule conflict, similar-schedule
    /// rejection, or an active-environment activation race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation failure: time ordering, weekday range, malformed JSON on a
    /// strict-parse path.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Chat model or plugin transport failure, with the upstream message.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Sequential task execution cannot progress (circular dependencies).
    #[error("Dependency deadlock: {0}")]
    DependencyDeadlock(String),

    /// Per-turn deadline fired or the turn was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Missing row, identified by whatever the caller used to look it up.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_domain_prefix() {
        let e = EngineError::conflict("schedule overlap");
        assert_eq!(e.to_string(), "Conflict: schedule overlap");
    }

    #[test]
    fn string_conversion_round_trip() {
        let e: EngineError = "something odd".into();
        let s: String = e.into();
        assert_eq!(s, "something odd");
    }
}
