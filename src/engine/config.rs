// Engine configuration read once from the environment.
// The library never loads .env files — that is the host's concern.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Character profile ──────────────────────────────────────────────────────

/// The role-played identity, read from CHARACTER_* variables.
#[derive(Debug, Clone)]
pub struct CharacterProfile {
    pub name: String,
    pub gender: String,
    pub role: String,
    pub age: String,
    pub height: String,
    pub weight: String,
    pub personality: String,
    pub hobby: String,
    pub background: String,
}

impl CharacterProfile {
    pub fn from_env() -> Self {
        Self {
            name: env_or("CHARACTER_NAME", "小可"),
            gender: env_or("CHARACTER_GENDER", "女"),
            role: env_or("CHARACTER_ROLE", "学生"),
            age: env_or("CHARACTER_AGE", "18"),
            height: env_or("CHARACTER_HEIGHT", "150cm"),
            weight: env_or("CHARACTER_WEIGHT", "45kg"),
            personality: env_or("CHARACTER_PERSONALITY", "活泼开朗"),
            hobby: env_or("CHARACTER_HOBBY", "文科，尤其对历史充满热情"),
            background: env_or("CHARACTER_BACKGROUND", ""),
        }
    }

    /// Template variable set used by prompt rendering.
    pub fn as_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("character_name".into(), self.name.clone());
        vars.insert("character_gender".into(), self.gender.clone());
        vars.insert("character_role".into(), self.role.clone());
        vars.insert("character_age".into(), self.age.clone());
        vars.insert("character_height".into(), self.height.clone());
        vars.insert("character_weight".into(), self.weight.clone());
        vars.insert("character_personality".into(), self.personality.clone());
        vars.insert("character_hobby".into(), self.hobby.clone());
        vars.insert("character_background".into(), self.background.clone());
        vars
    }
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self::from_env()
    }
}

// ── Engine settings ────────────────────────────────────────────────────────

/// Tunables for the per-turn pipeline and its round-counter triggers.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Short-term window bound, counted in user messages.
    pub max_short_term_rounds: u64,
    /// Knowledge extraction fires every this many user turns.
    pub knowledge_extraction_interval: u64,
    /// First emotion analysis once this many rounds have accumulated.
    pub emotion_first_rounds: u64,
    /// Subsequent emotion analyses every this many rounds.
    pub emotion_interval_rounds: u64,
    /// User expression-habit learning fires every this many rounds.
    pub expression_learn_interval: u64,
    /// Whole-pipeline deadline for one chat turn.
    pub turn_timeout: Duration,
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self {
            max_short_term_rounds: env_u64("SHORT_TERM_MAX_ROUNDS", 20),
            knowledge_extraction_interval: env_u64("KNOWLEDGE_EXTRACTION_INTERVAL", 5),
            emotion_first_rounds: env_u64("EMOTION_FIRST_ROUNDS", 5),
            emotion_interval_rounds: env_u64("EMOTION_INTERVAL_ROUNDS", 15),
            expression_learn_interval: env_u64("EXPRESSION_LEARN_INTERVAL", 10),
            turn_timeout: Duration::from_secs(env_u64("TURN_TIMEOUT_SECS", 120)),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_short_term_rounds: 20,
            knowledge_extraction_interval: 5,
            emotion_first_rounds: 5,
            emotion_interval_rounds: 15,
            expression_learn_interval: 10,
            turn_timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_reference_intervals() {
        let s = EngineSettings::default();
        assert_eq!(s.max_short_term_rounds, 20);
        assert_eq!(s.knowledge_extraction_interval, 5);
        assert_eq!(s.emotion_first_rounds, 5);
        assert_eq!(s.emotion_interval_rounds, 15);
    }

    #[test]
    fn profile_vars_cover_all_slots() {
        let profile = CharacterProfile {
            name: "测试".into(),
            gender: "女".into(),
            role: "学生".into(),
            age: "18".into(),
            height: "150cm".into(),
            weight: "45kg".into(),
            personality: "开朗".into(),
            hobby: "阅读".into(),
            background: "".into(),
        };
        let vars = profile.as_vars();
        assert_eq!(vars["character_name"], "测试");
        assert_eq!(vars.len(), 9);
    }
}
