use serde::{Deserialize, Serialize};

/// Harm categories every request carries a threshold for.
pub const HARM_CATEGORIES: [&str; 5] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Content filter strictness, from a guild's `safety` flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SafetyLevel {
    /// Block only high-probability harm.
    #[default]
    Relaxed,
    /// Block medium-probability harm and above.
    Strict,
}

impl SafetyLevel {
    pub fn from_guild_flag(safety: bool) -> Self {
        if safety {
            SafetyLevel::Strict
        } else {
            SafetyLevel::Relaxed
        }
    }

    pub fn threshold(self) -> &'static str {
        match self {
            SafetyLevel::Relaxed => "BLOCK_ONLY_HIGH",
            SafetyLevel::Strict => "BLOCK_MEDIUM_AND_ABOVE",
        }
    }
}

/// Image bytes sent along with a text prompt.
#[derive(Clone, Debug)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct TextRequest {
    pub model: String,
    /// Active system prompt; empty means none.
    pub system_prompt: String,
    pub prompt: String,
    /// `"<author>:  <text>"` lines, oldest first.
    pub history: Vec<String>,
    pub image: Option<InlineImage>,
    pub safety: SafetyLevel,
}

impl TextRequest {
    /// The user turn as sent to the model: prompt plus channel context.
    pub fn framed_prompt(&self) -> String {
        let n = self.history.len();
        let context = self.history.join("\n");
        if self.image.is_some() && self.prompt.trim().is_empty() {
            return format!(
                "What is in this image? Heres the last {n} message(s) in the channel for context: {context}"
            );
        }
        format!(
            "The users prompt: {} \n \n Heres the last {n} message(s) in the channel for context: {context} ",
            self.prompt
        )
    }
}

#[derive(Clone, Debug)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub safety: SafetyLevel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug)]
pub struct Generation {
    pub text: String,
    /// Model that actually answered (may differ from the requested alias).
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Clone, Debug)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub caption: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(prompt: &str, image: bool) -> TextRequest {
        TextRequest {
            model: "m".into(),
            system_prompt: String::new(),
            prompt: prompt.into(),
            history: vec!["ann:  hi".into(), "bob:  yo".into()],
            image: image.then(|| InlineImage {
                mime_type: "image/jpeg".into(),
                bytes: vec![1, 2],
            }),
            safety: SafetyLevel::default(),
        }
    }

    #[test]
    fn frames_prompt_with_context() {
        assert_eq!(
            req("tell me", false).framed_prompt(),
            "The users prompt: tell me \n \n Heres the last 2 message(s) in the channel for context: ann:  hi\nbob:  yo "
        );
    }

    #[test]
    fn bare_image_asks_what_it_shows() {
        assert!(req("", true)
            .framed_prompt()
            .starts_with("What is in this image? Heres the last 2 message(s)"));
        assert!(req("caption", true).framed_prompt().starts_with("The users prompt: caption"));
    }

    #[test]
    fn safety_thresholds() {
        assert_eq!(SafetyLevel::from_guild_flag(true).threshold(), "BLOCK_MEDIUM_AND_ABOVE");
        assert_eq!(SafetyLevel::from_guild_flag(false).threshold(), "BLOCK_ONLY_HIGH");
    }
}
