//! Chat-gateway abstractions. Telegram implements them in `gcb-telegram`.

pub mod port;
pub mod reply;
pub mod types;
