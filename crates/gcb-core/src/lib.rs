//! Core of the Gemini chat bot: persistence stores, settings, and the ports the
//! Telegram and Gemini adapters implement.
//!
//! Nothing in here talks to the network.

pub mod autocomplete;
pub mod config;
pub mod confirm;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod history;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod store;
pub mod utils;

pub use errors::{Error, Result};
