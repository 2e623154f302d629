//! Per-guild settings document (`config.json`).
//!
//! Every guild key maps to a complete `GuildConfig`; defaults are applied lazily the
//! first time a guild is touched, never field by field.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL},
    domain::GuildId,
    errors::{StoreError, StoreResult},
    store::{load_document, save_document},
    Result,
};

const TRUTHY: [&str; 4] = ["1", "true", "yes", "on"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
    Int,
    Bool,
    Str,
}

/// One editable field of a `GuildConfig`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    MaxHistory,
    WordThreshold,
    SetChannel,
    Threads,
    Statistics,
    DisplayModel,
    Safety,
    ImageModel,
    TextModel,
}

impl Setting {
    /// Document field order.
    pub const ALL: [Setting; 9] = [
        Setting::MaxHistory,
        Setting::WordThreshold,
        Setting::SetChannel,
        Setting::Threads,
        Setting::Statistics,
        Setting::DisplayModel,
        Setting::Safety,
        Setting::ImageModel,
        Setting::TextModel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Setting::MaxHistory => "max_history",
            Setting::WordThreshold => "word_threshold",
            Setting::SetChannel => "set_channel",
            Setting::Threads => "threads",
            Setting::Statistics => "statistics",
            Setting::DisplayModel => "display_model",
            Setting::Safety => "safety",
            Setting::ImageModel => "image_model",
            Setting::TextModel => "text_model",
        }
    }

    pub fn kind(self) -> SettingKind {
        match self {
            Setting::MaxHistory | Setting::WordThreshold | Setting::SetChannel => SettingKind::Int,
            Setting::Threads | Setting::Statistics | Setting::DisplayModel | Setting::Safety => {
                SettingKind::Bool
            }
            Setting::ImageModel | Setting::TextModel => SettingKind::Str,
        }
    }

    pub fn parse(option: &str) -> Option<Setting> {
        Self::ALL.into_iter().find(|s| s.name() == option)
    }
}

/// Option names sorted alphabetically (autocomplete order).
pub const ALL_OPTIONS: [&str; 9] = [
    "display_model",
    "image_model",
    "max_history",
    "safety",
    "set_channel",
    "statistics",
    "text_model",
    "threads",
    "word_threshold",
];

pub fn setting_kind(option: &str) -> Option<SettingKind> {
    Setting::parse(option).map(Setting::kind)
}

/// Values a new guild starts with.
#[derive(Clone, Debug, PartialEq)]
pub struct GuildDefaults {
    pub max_history: i64,
    pub word_threshold: i64,
    pub image_model: String,
    pub text_model: String,
}

impl Default for GuildDefaults {
    fn default() -> Self {
        Self {
            max_history: 10,
            word_threshold: 500,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub max_history: i64,
    pub word_threshold: i64,
    pub set_channel: Option<i64>,
    pub threads: bool,
    pub statistics: bool,
    pub display_model: bool,
    pub safety: bool,
    pub image_model: String,
    pub text_model: String,
}

impl GuildConfig {
    pub fn from_defaults(d: &GuildDefaults) -> Self {
        Self {
            max_history: d.max_history,
            word_threshold: d.word_threshold,
            set_channel: None,
            threads: false,
            statistics: false,
            display_model: true,
            safety: false,
            image_model: d.image_model.clone(),
            text_model: d.text_model.clone(),
        }
    }

    /// `(option, rendered value)` pairs in document order.
    pub fn display_rows(&self) -> Vec<(&'static str, String)> {
        Setting::ALL
            .iter()
            .map(|s| (s.name(), self.render(*s)))
            .collect()
    }

    fn render(&self, setting: Setting) -> String {
        match setting {
            Setting::MaxHistory => self.max_history.to_string(),
            Setting::WordThreshold => self.word_threshold.to_string(),
            Setting::SetChannel => self
                .set_channel
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            Setting::Threads => self.threads.to_string(),
            Setting::Statistics => self.statistics.to_string(),
            Setting::DisplayModel => self.display_model.to_string(),
            Setting::Safety => self.safety.to_string(),
            Setting::ImageModel => self.image_model.clone(),
            Setting::TextModel => self.text_model.clone(),
        }
    }
}

/// Apply a raw user-supplied value to one option.
///
/// Integers are clamped to `>= 0`; booleans are true only for `1/true/yes/on`
/// (any case); strings are stored verbatim.
pub fn set_field(config: &mut GuildConfig, option: &str, raw_value: &str) -> StoreResult<()> {
    let setting =
        Setting::parse(option).ok_or_else(|| StoreError::UnknownOption(option.to_string()))?;

    match setting.kind() {
        SettingKind::Int => {
            let v = raw_value
                .trim()
                .parse::<i64>()
                .map_err(|_| StoreError::InvalidValue {
                    option: option.to_string(),
                    value: raw_value.to_string(),
                })?
                .max(0);
            match setting {
                Setting::MaxHistory => config.max_history = v,
                Setting::WordThreshold => config.word_threshold = v,
                _ => config.set_channel = Some(v),
            }
        }
        SettingKind::Bool => {
            let v = TRUTHY.contains(&raw_value.to_lowercase().as_str());
            match setting {
                Setting::Threads => config.threads = v,
                Setting::Statistics => config.statistics = v,
                Setting::DisplayModel => config.display_model = v,
                _ => config.safety = v,
            }
        }
        SettingKind::Str => match setting {
            Setting::ImageModel => config.image_model = raw_value.to_string(),
            _ => config.text_model = raw_value.to_string(),
        },
    }
    Ok(())
}

/// Check an imported document against the nine-field schema.
///
/// All fields are required and `set_channel` may be null. Integers must fit in an
/// `i64`; negatives are clamped to 0 the same way `set_field` does. Unknown extra
/// keys are ignored.
pub fn validate_guild_document(doc: &serde_json::Value) -> StoreResult<GuildConfig> {
    let violation = |field: &str, rule: &str| StoreError::SchemaValidation {
        field: field.to_string(),
        rule: rule.to_string(),
    };

    let obj = doc
        .as_object()
        .ok_or_else(|| violation("$", "document must be a JSON object"))?;

    for setting in Setting::ALL {
        let field = setting.name();
        let value = obj
            .get(field)
            .ok_or_else(|| violation(field, "is a required property"))?;

        match setting.kind() {
            SettingKind::Int => {
                if setting == Setting::SetChannel && value.is_null() {
                    continue;
                }
                if value.is_u64() && !value.is_i64() {
                    return Err(violation(field, "integer out of range"));
                }
                if !value.is_i64() {
                    return Err(if setting == Setting::SetChannel {
                        violation(field, "must be an integer or null")
                    } else {
                        violation(field, "must be an integer")
                    });
                }
            }
            SettingKind::Bool => {
                if !value.is_boolean() {
                    return Err(violation(field, "must be a boolean"));
                }
            }
            SettingKind::Str => {
                if !value.is_string() {
                    return Err(violation(field, "must be a string"));
                }
            }
        }
    }

    let mut cfg: GuildConfig = serde_json::from_value(doc.clone())?;
    cfg.max_history = cfg.max_history.max(0);
    cfg.word_threshold = cfg.word_threshold.max(0);
    cfg.set_channel = cfg.set_channel.map(|c| c.max(0));
    Ok(cfg)
}

/// The whole `config.json` document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigRoot {
    #[serde(rename = "Guilds", default)]
    pub guilds: BTreeMap<String, GuildConfig>,
}

impl ConfigRoot {
    pub fn ensure_guild(&mut self, guild: &GuildId, defaults: &GuildDefaults) -> &mut GuildConfig {
        self.guilds
            .entry(guild.0.clone())
            .or_insert_with(|| GuildConfig::from_defaults(defaults))
    }

    pub fn contains(&self, guild: &GuildId) -> bool {
        self.guilds.contains_key(&guild.0)
    }
}

/// File-backed per-guild settings.
///
/// Like the prompt store, each operation re-reads the file and each write re-serializes
/// the whole document. `update` runs a read-modify-write cycle under an in-process lock.
pub struct ConfigStore {
    path: PathBuf,
    defaults: GuildDefaults,
    lock: Mutex<()>,
}

impl ConfigStore {
    /// Open the store, creating (or recovering) the backing file right away.
    pub fn open(path: impl Into<PathBuf>, defaults: GuildDefaults) -> Result<Self> {
        let store = Self {
            path: path.into(),
            defaults,
            lock: Mutex::new(()),
        };
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &GuildDefaults {
        &self.defaults
    }

    pub fn read(&self) -> Result<ConfigRoot> {
        load_document(&self.path, ConfigRoot::default)
    }

    pub fn write(&self, root: &ConfigRoot) -> Result<()> {
        save_document(&self.path, root)
    }

    /// Locked read-modify-write; the document is saved only when `f` reports a change.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut ConfigRoot) -> StoreResult<(R, bool)>,
    ) -> StoreResult<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut root = self.read()?;
        let (out, changed) = f(&mut root)?;
        if changed {
            self.write(&root)?;
        }
        Ok(out)
    }

    pub fn ensure_guild<'a>(&self, root: &'a mut ConfigRoot, guild: &GuildId) -> &'a mut GuildConfig {
        root.ensure_guild(guild, &self.defaults)
    }

    /// Pretty JSON of the guild's config, or of the defaults when it has none yet.
    pub fn export_guild(&self, root: &ConfigRoot, guild: &GuildId) -> StoreResult<String> {
        let cfg = root
            .guilds
            .get(&guild.0)
            .cloned()
            .unwrap_or_else(|| GuildConfig::from_defaults(&self.defaults));
        Ok(serde_json::to_string_pretty(&cfg)?)
    }

    /// Validate `document` and replace the guild's entire config with it.
    pub fn import_guild(
        &self,
        root: &mut ConfigRoot,
        guild: &GuildId,
        document: &str,
    ) -> StoreResult<()> {
        let value: serde_json::Value = serde_json::from_str(document)?;
        let cfg = validate_guild_document(&value)?;
        root.guilds.insert(guild.0.clone(), cfg);
        Ok(())
    }

    pub fn reset_guild(&self, root: &mut ConfigRoot, guild: &GuildId) -> StoreResult<()> {
        let Some(cfg) = root.guilds.get_mut(&guild.0) else {
            return Err(StoreError::NotFound(format!("config for guild {guild}")));
        };
        *cfg = GuildConfig::from_defaults(&self.defaults);
        Ok(())
    }

    /// The guild's config, created with defaults (and persisted) on first access.
    pub fn guild_config(&self, guild: &GuildId) -> StoreResult<GuildConfig> {
        self.update(|root| {
            let existed = root.contains(guild);
            let cfg = self.ensure_guild(root, guild).clone();
            Ok((cfg, !existed))
        })
    }

    /// `ensure_guild` + `set_field` + write, as one locked step.
    pub fn edit_field(&self, guild: &GuildId, option: &str, raw_value: &str) -> StoreResult<GuildConfig> {
        self.update(|root| {
            let cfg = self.ensure_guild(root, guild);
            set_field(cfg, option, raw_value)?;
            Ok((cfg.clone(), true))
        })
    }
}
