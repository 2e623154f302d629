//! Generative model port. The Gemini adapter lives in `gcb-gemini`.

pub mod client;
pub mod types;
