//! Named system-prompt registry (`prompts.json`).
//!
//! Invariants:
//! - a prompt named `default` always exists and cannot be deleted
//! - at most one prompt is flagged `is_active`, the one named by `active_prompt`
//! - `usage_history` keeps only the 100 most recent activations

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    errors::{StoreError, StoreResult},
    store::{load_document, save_document},
    utils::{iso_timestamp, truncate_chars},
    Result,
};

pub const DEFAULT_PROMPT: &str = "default";
pub const DEFAULT_CREATOR: &str = "Master";
pub const HISTORY_LIMIT: usize = 100;
pub const MAX_NAME_LEN: usize = 50;

/// User ids are kept as decimal strings; older documents store them as JSON numbers.
fn user_id_string<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(de)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub content: String,
    #[serde(deserialize_with = "user_id_string")]
    pub created_by: String,
    pub created_at: String,
    pub usage_count: u64,
    pub is_active: bool,
}

impl Prompt {
    fn new(name: &str, content: &str, created_by: &str, created_at: String) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
            created_by: created_by.to_string(),
            created_at,
            usage_count: 0,
            is_active: false,
        }
    }

    /// Content shortened for display.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_name: String,
    #[serde(deserialize_with = "user_id_string")]
    pub used_by: String,
    pub used_at: String,
}

/// The whole `prompts.json` document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptRegistry {
    #[serde(default = "default_active_name")]
    pub active_prompt: String,
    #[serde(default)]
    pub prompts: BTreeMap<String, Prompt>,
    #[serde(default)]
    pub usage_history: Vec<UsageRecord>,
}

fn default_active_name() -> String {
    DEFAULT_PROMPT.to_string()
}

impl Default for PromptRegistry {
    fn default() -> Self {
        let mut default = Prompt::new(DEFAULT_PROMPT, "", DEFAULT_CREATOR, iso_timestamp());
        default.is_active = true;

        let mut prompts = BTreeMap::new();
        prompts.insert(DEFAULT_PROMPT.to_string(), default);

        Self {
            active_prompt: DEFAULT_PROMPT.to_string(),
            prompts,
            usage_history: Vec::new(),
        }
    }
}

impl PromptRegistry {
    /// Re-insert the `default` prompt if a hand-edited document lost it.
    fn repair(&mut self) {
        if self.prompts.contains_key(DEFAULT_PROMPT) {
            return;
        }
        let active = !self.prompts.contains_key(&self.active_prompt);
        let mut default = Prompt::new(DEFAULT_PROMPT, "", DEFAULT_CREATOR, iso_timestamp());
        default.is_active = active;
        self.prompts.insert(DEFAULT_PROMPT.to_string(), default);
    }

    /// Name of the prompt in effect; a stale reference falls back to `default`.
    pub fn effective_active_name(&self) -> &str {
        if self.prompts.contains_key(&self.active_prompt) {
            &self.active_prompt
        } else {
            DEFAULT_PROMPT
        }
    }

    pub fn active_content(&self) -> &str {
        self.prompts
            .get(self.effective_active_name())
            .map(|p| p.content.as_str())
            .unwrap_or("")
    }

    pub fn insert(&mut self, name: &str, content: &str, creator: &str) -> StoreResult<()> {
        validate_prompt_name(name)?;
        if self.prompts.contains_key(name) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        self.prompts.insert(
            name.to_string(),
            Prompt::new(name, content, creator, iso_timestamp()),
        );
        Ok(())
    }

    /// Switch the active prompt. Returns false (no change) for an unknown name.
    pub fn activate(&mut self, name: &str, user_id: &str) -> bool {
        if !self.prompts.contains_key(name) {
            return false;
        }

        for p in self.prompts.values_mut() {
            p.is_active = false;
        }
        if let Some(target) = self.prompts.get_mut(name) {
            target.is_active = true;
            target.usage_count = target.usage_count.saturating_add(1);
        }
        self.active_prompt = name.to_string();

        self.usage_history.push(UsageRecord {
            prompt_name: name.to_string(),
            used_by: user_id.to_string(),
            used_at: iso_timestamp(),
        });
        if self.usage_history.len() > HISTORY_LIMIT {
            let excess = self.usage_history.len() - HISTORY_LIMIT;
            self.usage_history.drain(..excess);
        }
        true
    }

    /// Remove a prompt, re-activating `default` first if it was the active one.
    pub fn remove(&mut self, name: &str, user_id: &str) -> StoreResult<bool> {
        if name == DEFAULT_PROMPT {
            return Err(StoreError::ProtectedName(name.to_string()));
        }
        if !self.prompts.contains_key(name) {
            return Ok(false);
        }
        if self.active_prompt == name {
            self.activate(DEFAULT_PROMPT, user_id);
        }
        self.prompts.remove(name);
        Ok(true)
    }

    /// Distinct prompt names from the usage history, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for usage in self.usage_history.iter().rev() {
            if names.len() >= limit {
                break;
            }
            if !names.contains(&usage.prompt_name) {
                names.push(usage.prompt_name.clone());
            }
        }
        names
    }
}

/// Prompt names are used as command arguments: no whitespace, at most 50 characters.
pub fn validate_prompt_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid("name must not contain spaces"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 50 characters"));
    }
    Ok(())
}

/// File-backed prompt registry.
///
/// Every operation re-reads the file and every mutation re-writes it, serialized by an
/// in-process lock so concurrent commands cannot interleave read-modify-write cycles.
pub struct PromptStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PromptStore {
    /// Open the store, creating (or recovering) the backing file right away.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; missing files get a fresh default, corrupt ones are backed up.
    pub fn load(&self) -> Result<PromptRegistry> {
        let mut reg = load_document(&self.path, PromptRegistry::default)?;
        reg.repair();
        Ok(reg)
    }

    pub fn save(&self, reg: &PromptRegistry) -> Result<()> {
        save_document(&self.path, reg)
    }

    fn read<R>(&self, f: impl FnOnce(&PromptRegistry) -> R) -> StoreResult<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let reg = self.load()?;
        Ok(f(&reg))
    }

    /// Run a mutation under the lock; the document is saved only when `f` reports a change.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut PromptRegistry) -> StoreResult<(R, bool)>,
    ) -> StoreResult<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut reg = self.load()?;
        let (out, changed) = f(&mut reg)?;
        if changed {
            self.save(&reg)?;
        }
        Ok(out)
    }

    pub fn add_prompt(&self, name: &str, content: &str, creator_id: &str) -> StoreResult<()> {
        self.mutate(|reg| reg.insert(name, content, creator_id).map(|_| ((), true)))
    }

    /// Content of the active prompt (or of `default` when the reference is stale).
    pub fn active_prompt(&self) -> StoreResult<String> {
        self.read(|reg| reg.active_content().to_string())
    }

    pub fn active_prompt_name(&self) -> StoreResult<String> {
        self.read(|reg| reg.effective_active_name().to_string())
    }

    pub fn set_active_prompt(&self, name: &str, user_id: &str) -> StoreResult<bool> {
        self.mutate(|reg| {
            let switched = reg.activate(name, user_id);
            Ok((switched, switched))
        })
    }

    /// Copies of every prompt record, ordered by name.
    pub fn all_prompts(&self) -> StoreResult<Vec<Prompt>> {
        self.read(|reg| reg.prompts.values().cloned().collect())
    }

    pub fn prompt_names(&self) -> StoreResult<Vec<String>> {
        self.read(|reg| reg.prompts.keys().cloned().collect())
    }

    pub fn prompt_by_name(&self, name: &str) -> StoreResult<Option<Prompt>> {
        self.read(|reg| reg.prompts.get(name).cloned())
    }

    pub fn delete_prompt(&self, name: &str, user_id: &str) -> StoreResult<bool> {
        self.mutate(|reg| {
            let removed = reg.remove(name, user_id)?;
            Ok((removed, removed))
        })
    }

    pub fn recent_prompts(&self, limit: usize) -> StoreResult<Vec<String>> {
        self.read(|reg| reg.recent(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{backup_path, scratch_path};
    use std::fs;

    fn open_store(prefix: &str) -> PromptStore {
        PromptStore::open(scratch_path(prefix)).unwrap()
    }

    fn cleanup(store: &PromptStore) {
        if let Some(dir) = store.path().parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    fn active_flags(store: &PromptStore) -> Vec<String> {
        store
            .all_prompts()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| p.name)
            .collect()
    }

    #[test]
    fn fresh_store_has_only_active_default() {
        let store = open_store("fresh");
        let reg = store.load().unwrap();

        assert_eq!(reg.active_prompt, DEFAULT_PROMPT);
        assert_eq!(reg.prompts.len(), 1);
        let d = &reg.prompts[DEFAULT_PROMPT];
        assert_eq!(d.content, "");
        assert_eq!(d.created_by, DEFAULT_CREATOR);
        assert_eq!(d.usage_count, 0);
        assert!(d.is_active);
        assert!(reg.usage_history.is_empty());
        assert!(store.path().exists());
        cleanup(&store);
    }

    #[test]
    fn distinct_names_coexist_and_duplicates_fail() {
        let store = open_store("dup");
        store.add_prompt("a", "alpha", "1").unwrap();
        store.add_prompt("b", "beta", "2").unwrap();

        assert_eq!(store.prompt_by_name("a").unwrap().unwrap().content, "alpha");
        let b = store.prompt_by_name("b").unwrap().unwrap();
        assert_eq!(b.created_by, "2");
        assert_eq!(b.usage_count, 0);
        assert!(!b.is_active);

        let err = store.add_prompt("a", "again", "3").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(n) if n == "a"));
        // Case-sensitive.
        store.add_prompt("A", "upper", "3").unwrap();
        assert_eq!(store.all_prompts().unwrap().len(), 4);
        cleanup(&store);
    }

    #[test]
    fn rejects_bad_names() {
        let store = open_store("names");
        assert!(matches!(
            store.add_prompt("has space", "x", "1"),
            Err(StoreError::InvalidName { .. })
        ));
        assert!(matches!(
            store.add_prompt(&"x".repeat(51), "x", "1"),
            Err(StoreError::InvalidName { .. })
        ));
        assert!(store.add_prompt(&"x".repeat(50), "x", "1").is_ok());
        cleanup(&store);
    }

    #[test]
    fn switching_keeps_exactly_one_active() {
        let store = open_store("switch");
        store.add_prompt("a", "alpha", "1").unwrap();
        store.add_prompt("b", "beta", "1").unwrap();

        assert!(store.set_active_prompt("a", "9").unwrap());
        assert_eq!(active_flags(&store), vec!["a".to_string()]);
        assert!(store.set_active_prompt("b", "9").unwrap());
        assert_eq!(active_flags(&store), vec!["b".to_string()]);
        assert_eq!(store.active_prompt().unwrap(), "beta");

        assert!(!store.set_active_prompt("missing", "9").unwrap());
        assert_eq!(active_flags(&store), vec!["b".to_string()]);
        assert_eq!(store.active_prompt_name().unwrap(), "b");

        let b = store.prompt_by_name("b").unwrap().unwrap();
        assert_eq!(b.usage_count, 1);
        let reg = store.load().unwrap();
        assert_eq!(reg.usage_history.len(), 2);
        assert_eq!(reg.usage_history[1].used_by, "9");
        cleanup(&store);
    }

    #[test]
    fn usage_history_is_capped_dropping_oldest() {
        let store = open_store("cap");
        store.add_prompt("a", "alpha", "1").unwrap();
        for i in 0..(HISTORY_LIMIT + 20) {
            let name = if i % 2 == 0 { "a" } else { DEFAULT_PROMPT };
            store.set_active_prompt(name, &i.to_string()).unwrap();
        }

        let reg = store.load().unwrap();
        assert_eq!(reg.usage_history.len(), HISTORY_LIMIT);
        assert_eq!(reg.usage_history[0].used_by, "20");
        assert_eq!(
            reg.usage_history.last().unwrap().used_by,
            (HISTORY_LIMIT + 19).to_string()
        );
        cleanup(&store);
    }

    #[test]
    fn default_is_protected() {
        let store = open_store("protect");
        let err = store.delete_prompt(DEFAULT_PROMPT, "1").unwrap_err();
        assert!(matches!(err, StoreError::ProtectedName(_)));

        store.add_prompt("a", "alpha", "1").unwrap();
        store.set_active_prompt("a", "1").unwrap();
        assert!(matches!(
            store.delete_prompt(DEFAULT_PROMPT, "1"),
            Err(StoreError::ProtectedName(_))
        ));
        cleanup(&store);
    }

    #[test]
    fn deleting_active_prompt_falls_back_to_default() {
        let store = open_store("delete-active");
        store.add_prompt("a", "alpha", "1").unwrap();
        store.set_active_prompt("a", "1").unwrap();

        assert!(store.delete_prompt("a", "7").unwrap());
        assert!(store.prompt_by_name("a").unwrap().is_none());
        assert_eq!(store.active_prompt_name().unwrap(), DEFAULT_PROMPT);
        assert_eq!(store.active_prompt().unwrap(), "");
        assert_eq!(active_flags(&store), vec![DEFAULT_PROMPT.to_string()]);

        let reg = store.load().unwrap();
        let last = reg.usage_history.last().unwrap();
        assert_eq!(last.prompt_name, DEFAULT_PROMPT);
        assert_eq!(last.used_by, "7");

        assert!(!store.delete_prompt("a", "7").unwrap());
        cleanup(&store);
    }

    #[test]
    fn recent_prompts_are_distinct_most_recent_first() {
        let store = open_store("recent");
        for n in ["a", "b", "c"] {
            store.add_prompt(n, n, "1").unwrap();
        }
        for n in ["a", "b", "a", "c"] {
            store.set_active_prompt(n, "1").unwrap();
        }
        assert_eq!(store.recent_prompts(3).unwrap(), vec!["c", "a", "b"]);
        assert_eq!(store.recent_prompts(1).unwrap(), vec!["c"]);
        assert!(store.recent_prompts(0).unwrap().is_empty());
        cleanup(&store);
    }

    #[test]
    fn stale_active_reference_falls_back_to_default_content() {
        let store = open_store("stale");
        let mut reg = store.load().unwrap();
        reg.prompts.get_mut(DEFAULT_PROMPT).unwrap().content = "be nice".into();
        reg.active_prompt = "ghost".into();
        store.save(&reg).unwrap();

        assert_eq!(store.active_prompt().unwrap(), "be nice");
        assert_eq!(store.active_prompt_name().unwrap(), DEFAULT_PROMPT);
        cleanup(&store);
    }

    #[test]
    fn missing_default_is_repaired_on_load() {
        let store = open_store("repair");
        store.add_prompt("a", "alpha", "1").unwrap();
        store.set_active_prompt("a", "1").unwrap();
        let mut reg = store.load().unwrap();
        reg.prompts.remove(DEFAULT_PROMPT);
        store.save(&reg).unwrap();

        let reg = store.load().unwrap();
        assert!(reg.prompts.contains_key(DEFAULT_PROMPT));
        assert!(!reg.prompts[DEFAULT_PROMPT].is_active);
        assert_eq!(reg.effective_active_name(), "a");
        cleanup(&store);
    }

    #[test]
    fn corrupt_file_is_backed_up_and_reset() {
        let store = open_store("corrupt");
        store.add_prompt("a", "alpha", "1").unwrap();
        fs::write(store.path(), "{\"prompts\": [oops").unwrap();

        let reg = store.load().unwrap();
        assert_eq!(reg.active_prompt, DEFAULT_PROMPT);
        assert!(reg.usage_history.is_empty());
        assert_eq!(reg.prompts.len(), 1);
        assert!(reg.prompts[DEFAULT_PROMPT].is_active);
        assert_eq!(
            fs::read_to_string(backup_path(store.path())).unwrap(),
            "{\"prompts\": [oops"
        );
        cleanup(&store);
    }

    #[test]
    fn document_round_trips_unchanged() {
        let store = open_store("roundtrip");
        store.add_prompt("ünï", "çontent ✓", "1").unwrap();
        store.set_active_prompt("ünï", "1").unwrap();

        let before = fs::read_to_string(store.path()).unwrap();
        let reg = store.load().unwrap();
        store.save(&reg).unwrap();
        let after = fs::read_to_string(store.path()).unwrap();
        assert_eq!(before, after);
        assert!(after.contains("çontent ✓"));
        cleanup(&store);
    }

    #[test]
    fn reads_documents_written_with_naive_timestamps() {
        let store = open_store("legacy");
        let raw = r#"{
  "active_prompt": "default",
  "prompts": {
    "default": {"name": "default", "content": "", "created_by": "Master",
                "created_at": "2025-01-02T03:04:05.678901", "usage_count": 0, "is_active": true}
  },
  "usage_history": []
}"#;
        fs::write(store.path(), raw).unwrap();
        let reg = store.load().unwrap();
        assert_eq!(
            reg.prompts[DEFAULT_PROMPT].created_at,
            "2025-01-02T03:04:05.678901"
        );
        assert!(!backup_path(store.path()).exists());
        cleanup(&store);
    }

    #[test]
    fn keeps_prompts_whose_user_ids_are_numbers() {
        let store = open_store("numeric-ids");
        let raw = r#"{
  "active_prompt": "pirate",
  "prompts": {
    "default": {"name": "default", "content": "", "created_by": "Master",
                "created_at": "2025-01-02T03:04:05.678901", "usage_count": 0, "is_active": false},
    "pirate": {"name": "pirate", "content": "talk like a pirate", "created_by": 123456789012345678,
               "created_at": "2025-01-03T10:00:00.000001", "usage_count": 1, "is_active": true}
  },
  "usage_history": [
    {"prompt_name": "pirate", "used_by": 123456789012345678, "used_at": "2025-01-03T10:00:01.000001"}
  ]
}"#;
        fs::write(store.path(), raw).unwrap();

        assert_eq!(store.prompt_names().unwrap(), vec!["default", "pirate"]);
        assert_eq!(store.active_prompt().unwrap(), "talk like a pirate");
        let pirate = store.prompt_by_name("pirate").unwrap().unwrap();
        assert_eq!(pirate.created_by, "123456789012345678");
        let reg = store.load().unwrap();
        assert_eq!(reg.usage_history[0].used_by, "123456789012345678");
        assert!(!backup_path(store.path()).exists());

        // The next write stores the ids as strings.
        store.set_active_prompt("default", "7").unwrap();
        let saved = fs::read_to_string(store.path()).unwrap();
        assert!(saved.contains(r#""created_by": "123456789012345678""#));
        cleanup(&store);
    }

    #[test]
    fn preview_truncates_long_content() {
        let p = Prompt::new("a", &"z".repeat(1200), "1", iso_timestamp());
        let shown = p.preview(1000);
        assert_eq!(shown.chars().count(), 1003);
        assert!(shown.ends_with("..."));
    }
}
