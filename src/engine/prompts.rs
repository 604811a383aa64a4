// Eidolon Engine — Prompt Library
// Markdown templates under {root}/{category}/{name}.md with `{slot}`
// placeholders. Loaded lazily, cached by (category, name), reloadable per
// key. Missing slots render as empty strings so a half-filled variable set
// never leaks placeholder syntax into a live prompt.
//
// Categories are fixed: character / system / task / worldview.

use crate::atoms::error::{EngineError, EngineResult};
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

pub const CATEGORY_CHARACTER: &str = "character";
pub const CATEGORY_SYSTEM: &str = "system";
pub const CATEGORY_TASK: &str = "task";
pub const CATEGORY_WORLDVIEW: &str = "worldview";

pub struct PromptLibrary {
    root: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: Mutex::new(HashMap::new()) }
    }

    /// Library rooted at `PROMPTS_DIR` (default `./prompts`).
    pub fn from_env() -> Self {
        let root = std::env::var("PROMPTS_DIR").unwrap_or_else(|_| "prompts".to_string());
        Self::new(root)
    }

    fn cache_key(category: &str, name: &str) -> String {
        format!("{category}/{name}")
    }

    /// Load a raw template, reading from disk on first use.
    pub fn load(&self, category: &str, name: &str) -> EngineResult<String> {
        let key = Self::cache_key(category, name);
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached.clone());
        }
        let path = self.root.join(category).join(format!("{name}.md"));
        let content = std::fs::read_to_string(&path).map_err(|_| {
            EngineError::not_found(format!("prompt template {}", path.display()))
        })?;
        self.cache.lock().insert(key, content.clone());
        Ok(content)
    }

    /// Replace every `{slot}` with its value; slots missing from `vars`
    /// render as empty strings.
    pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find(['{', '}']) {
                // A well-formed `{name}` — substitute (empty when unknown).
                Some(close) if after.as_bytes()[close] == b'}' => {
                    let name = &after[..close];
                    if let Some(value) = vars.get(name) {
                        result.push_str(value);
                    }
                    rest = &after[close + 1..];
                }
                // Nested `{` or unterminated brace: emit literally and move on.
                _ => {
                    result.push('{');
                    rest = after;
                }
            }
        }
        result.push_str(rest);
        result
    }

    /// Load and render in one step.
    pub fn render(
        &self,
        category: &str,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> EngineResult<String> {
        let template = self.load(category, name)?;
        Ok(Self::substitute(&template, vars))
    }

    /// Drop one cached key so the next load re-reads the file.
    pub fn reload(&self, category: &str, name: &str) {
        self.cache.lock().remove(&Self::cache_key(category, name));
    }

    /// Enumerate template names in a category (without the .md suffix).
    pub fn list(&self, category: &str) -> Vec<String> {
        let dir = self.root.join(category);
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().and_then(|s| s.to_str()) == Some("md") {
                            path.file_stem().and_then(|s| s.to_str()).map(String::from)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    // ── Category accessors ─────────────────────────────────────────────

    /// Character sheet. Prefers a file named after the character, then the
    /// configured default, then a built-in fallback so a chat turn never
    /// fails on a missing template.
    pub fn character_prompt(
        &self,
        character_name: Option<&str>,
        vars: &HashMap<String, String>,
    ) -> String {
        if let Some(name) = character_name {
            if let Ok(text) = self.render(CATEGORY_CHARACTER, name, vars) {
                return text;
            }
        }
        let default_file = std::env::var("CHARACTER_PROMPT_FILE")
            .unwrap_or_else(|_| "default_character".to_string());
        match self.render(CATEGORY_CHARACTER, &default_file, vars) {
            Ok(text) => text,
            Err(e) => {
                warn!("[prompts] character template unavailable, using fallback: {e}");
                fallback_character_prompt(vars)
            }
        }
    }

    pub fn system_prompt(
        &self,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> EngineResult<String> {
        self.render(CATEGORY_SYSTEM, name, vars)
    }

    pub fn task_prompt(&self, name: &str, vars: &HashMap<String, String>) -> EngineResult<String> {
        self.render(CATEGORY_TASK, name, vars)
    }

    /// Worldview text; the file is picked by `WORLDVIEW_FILE` (default
    /// `default_world`). Missing worldview renders empty — the world is
    /// simply unspecified.
    pub fn worldview_prompt(&self, vars: &HashMap<String, String>) -> String {
        let file =
            std::env::var("WORLDVIEW_FILE").unwrap_or_else(|_| "default_world".to_string());
        self.render(CATEGORY_WORLDVIEW, &file, vars).unwrap_or_default()
    }
}

/// Minimal built-in character sheet used when no template file exists.
fn fallback_character_prompt(vars: &HashMap<String, String>) -> String {
    let get = |k: &str| vars.get(k).cloned().unwrap_or_default();
    format!(
        "你是{name}。\n\n【你的人设】\n- 姓名：{name}\n- 性别：{gender}\n- 身份：{role}\n- 年龄：{age}\n- 性格：{personality}\n- 爱好：{hobby}\n- 背景：{background}\n",
        name = get("character_name"),
        gender = get("character_gender"),
        role = get("character_role"),
        age = get("character_age"),
        personality = get("character_personality"),
        hobby = get("character_hobby"),
        background = get("character_background"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitute_replaces_known_and_blanks_unknown() {
        let out = PromptLibrary::substitute(
            "Hello {name}, welcome to {place}!",
            &vars(&[("name", "小可")]),
        );
        assert_eq!(out, "Hello 小可, welcome to !");
    }

    #[test]
    fn substitute_leaves_unmatched_braces() {
        let out = PromptLibrary::substitute("json like {{\"a\": 1}", &vars(&[]));
        assert!(out.contains('{'));
    }

    #[test]
    fn load_caches_and_reload_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let sys = dir.path().join("system");
        fs::create_dir_all(&sys).unwrap();
        fs::write(sys.join("greet.md"), "hello {who}").unwrap();

        let lib = PromptLibrary::new(dir.path());
        let first = lib.render("system", "greet", &vars(&[("who", "world")])).unwrap();
        assert_eq!(first, "hello world");

        // Change on disk; cache still serves the old content.
        fs::write(sys.join("greet.md"), "hi {who}").unwrap();
        let cached = lib.render("system", "greet", &vars(&[("who", "world")])).unwrap();
        assert_eq!(cached, "hello world");

        lib.reload("system", "greet");
        let fresh = lib.render("system", "greet", &vars(&[("who", "world")])).unwrap();
        assert_eq!(fresh, "hi world");
    }

    #[test]
    fn missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(dir.path());
        let err = lib.load("system", "nope").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn list_enumerates_md_files() {
        let dir = tempfile::tempdir().unwrap();
        let task = dir.path().join("task");
        fs::create_dir_all(&task).unwrap();
        fs::write(task.join("b.md"), "").unwrap();
        fs::write(task.join("a.md"), "").unwrap();
        fs::write(task.join("ignored.txt"), "").unwrap();

        let lib = PromptLibrary::new(dir.path());
        assert_eq!(lib.list("task"), vec!["a", "b"]);
    }

    #[test]
    fn character_prompt_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(dir.path());
        let text = lib.character_prompt(None, &vars(&[("character_name", "小可")]));
        assert!(text.contains("小可"));
    }
}
