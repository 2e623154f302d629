use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, store::guild_config::GuildDefaults, Result};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Typed process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub allowed_chats: Vec<i64>,

    // Backing files
    pub prompts_file: PathBuf,
    pub config_file: PathBuf,

    // Defaults for new guild configs
    pub text_model: String,
    pub image_model: String,
    pub max_history: i64,
    pub max_message_length: i64,

    // Runtime
    pub confirm_timeout: Duration,
    pub chunk_size: usize,
    pub gemini_api_base: String,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let gemini_api_key = env_str("GEMINI_API_KEY")
            .and_then(non_empty)
            .or_else(|| env_str("GOOGLE_API_KEY").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("GEMINI_API_KEY (or GOOGLE_API_KEY) is required".to_string())
            })?;

        let allowed_chats = parse_csv_i64(env_str("ALLOWED_CHATS"));

        let prompts_file =
            PathBuf::from(env_str("PROMPTS_FILE").unwrap_or("prompts.json".to_string()));
        let config_file =
            PathBuf::from(env_str("CONFIG_FILE").unwrap_or("config.json".to_string()));

        let text_model = env_str("TEXT_MODEL")
            .and_then(non_empty)
            .unwrap_or(DEFAULT_TEXT_MODEL.to_string());
        let image_model = env_str("IMAGE_MODEL")
            .and_then(non_empty)
            .unwrap_or(DEFAULT_IMAGE_MODEL.to_string());
        let max_history = env_i64("MAX_HISTORY").unwrap_or(10).max(0);
        let max_message_length = env_i64("MAX_MESSAGE_LENGTH").unwrap_or(500).max(0);

        let confirm_timeout = Duration::from_secs(env_u64("CONFIRM_TIMEOUT_SECS").unwrap_or(60));
        // Telegram hard limit is 4096 characters per message.
        let chunk_size = env_usize("CHUNK_SIZE").unwrap_or(1900).clamp(100, 4000);
        let gemini_api_base = env_str("GEMINI_API_BASE")
            .and_then(non_empty)
            .unwrap_or(DEFAULT_GEMINI_API_BASE.to_string());
        let request_timeout =
            Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS").unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            gemini_api_key,
            allowed_chats,
            prompts_file,
            config_file,
            text_model,
            image_model,
            max_history,
            max_message_length,
            confirm_timeout,
            chunk_size,
            gemini_api_base,
            request_timeout,
        })
    }

    /// Defaults applied to a guild the first time it is seen.
    pub fn guild_defaults(&self) -> GuildDefaults {
        GuildDefaults {
            max_history: self.max_history,
            word_threshold: self.max_message_length,
            image_model: self.image_model.clone(),
            text_model: self.text_model.clone(),
        }
    }

    /// An empty allow-list serves every chat.
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    let quoted = val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')));
    if quoted {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_csv_ids_skipping_garbage() {
        let ids = parse_csv_i64(Some(" -1001, 42,,abc, 7 ".to_string()));
        assert_eq!(ids, vec![-1001, 42, 7]);
    }

    #[test]
    fn strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("x"), "x");
    }

    #[test]
    fn empty_allow_list_serves_everyone() {
        let mut cfg = test_config();
        assert!(cfg.is_chat_allowed(-5));
        cfg.allowed_chats = vec![1];
        assert!(cfg.is_chat_allowed(1));
        assert!(!cfg.is_chat_allowed(2));
    }

    #[test]
    fn guild_defaults_follow_config() {
        let cfg = test_config();
        let d = cfg.guild_defaults();
        assert_eq!(d.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(d.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(d.max_history, 10);
        assert_eq!(d.word_threshold, 500);
    }

    fn test_config() -> Config {
        Config {
            telegram_bot_token: "t".into(),
            gemini_api_key: "k".into(),
            allowed_chats: vec![],
            prompts_file: "/tmp/p.json".into(),
            config_file: "/tmp/c.json".into(),
            text_model: DEFAULT_TEXT_MODEL.into(),
            image_model: DEFAULT_IMAGE_MODEL.into(),
            max_history: 10,
            max_message_length: 500,
            confirm_timeout: Duration::from_secs(60),
            chunk_size: 1900,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.into(),
            request_timeout: Duration::from_secs(60),
        }
    }
}
