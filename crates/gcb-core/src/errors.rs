use std::path::PathBuf;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the command
/// layer can handle failures consistently (user-facing message vs log-only).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not recover {path}: {reason}")]
    Recovery { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Typed failures of the prompt and config stores.
///
/// None of these are fatal; the command layer renders them as user-facing text.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid JSON document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("prompt '{0}' already exists")]
    DuplicateName(String),

    #[error("cannot delete the '{0}' prompt")]
    ProtectedName(String),

    #[error("invalid prompt name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("unknown setting '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for {option}")]
    InvalidValue { option: String, value: String },

    #[error("schema violation at '{field}': {rule}")]
    SchemaValidation { field: String, rule: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Persistence(#[from] Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
