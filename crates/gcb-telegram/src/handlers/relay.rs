use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use regex::Regex;
use teloxide::prelude::*;

use gcb_core::{
    domain::{MessageRef, TopicId},
    formatting::escape_html,
    messaging::{
        reply::{deliver_reply, model_footer, usage_footer, ReplyOptions, CHUNK_DELAY},
        types::ChatAction,
    },
    model::types::{Generation, InlineImage, SafetyLevel, TextRequest},
    store::guild_config::GuildConfig,
};

use crate::router::AppState;

use super::{media, ChatActionLoop, Origin};

/// Whether a plain message should get an answer.
///
/// Private chats always do. In groups the bot answers when mentioned, when replied to,
/// or for every message in the topic picked with `set_channel`.
fn is_addressed(
    private: bool,
    set_channel: Option<i64>,
    topic: TopicId,
    mentioned: bool,
    reply_to_bot: bool,
) -> bool {
    private || mentioned || reply_to_bot || set_channel == Some(topic.0)
}

fn mention_pattern(username: &str) -> Option<Regex> {
    if username.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)@{}\b", regex::escape(username));
    Some(Regex::new(&pattern).expect("valid regex"))
}

fn mentions(text: &str, username: &str) -> bool {
    mention_pattern(username).is_some_and(|re| re.is_match(text))
}

/// The message text without `@username`.
fn strip_mention(text: &str, username: &str) -> String {
    match mention_pattern(username) {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

pub(crate) fn reply_options(
    state: &AppState,
    cfg: &GuildConfig,
    footer_html: Option<String>,
) -> ReplyOptions {
    ReplyOptions {
        word_threshold: usize::try_from(cfg.word_threshold).unwrap_or(0),
        chunk_size: state.cfg.chunk_size,
        threads: cfg.threads,
        footer_html,
        chunk_delay: CHUNK_DELAY,
    }
}

fn footer_for(cfg: &GuildConfig, generation: &Generation, elapsed: Duration) -> Option<String> {
    let mut lines = Vec::new();
    if cfg.display_model {
        lines.push(model_footer(&generation.model));
    }
    if cfg.statistics {
        let usage = generation.usage.clone().unwrap_or_default();
        lines.push(usage_footer(usage.input_tokens, usage.output_tokens, elapsed));
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Send a model answer with the guild's chunking, threading and footer settings.
pub(crate) async fn send_generation(
    state: &AppState,
    origin: &Origin,
    cfg: &GuildConfig,
    generation: &Generation,
    started: Instant,
) -> gcb_core::Result<Vec<MessageRef>> {
    let footer = footer_for(cfg, generation, started.elapsed());
    let opts = reply_options(state, cfg, footer);
    deliver_reply(state.messenger.as_ref(), origin.reply(), &generation.text, &opts).await
}

pub async fn handle_relay(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let origin = Origin::from_message(&msg);
    let text = msg.text().or_else(|| msg.caption()).unwrap_or("").to_string();

    let cfg = match state.configs.guild_config(&origin.guild()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, chat_id = origin.chat_id.0, "guild config unavailable");
            return Ok(());
        }
    };

    let limit = usize::try_from(cfg.max_history).unwrap_or(0);
    let context = state
        .history
        .context_lines(origin.chat_id, origin.topic, limit)
        .await;
    state
        .history
        .record(origin.chat_id, origin.topic, &origin.author, &text)
        .await;

    let reply_to_bot = msg
        .reply_to_message()
        .and_then(|r| r.from())
        .is_some_and(|u| u.id.0 == state.me.user_id);
    if !is_addressed(
        msg.chat.is_private(),
        cfg.set_channel,
        origin.topic,
        mentions(&text, &state.me.username),
        reply_to_bot,
    ) {
        return Ok(());
    }

    let prompt = strip_mention(&text, &state.me.username);
    let image_ref = media::image_of(&msg);
    if prompt.is_empty() && image_ref.is_none() {
        return Ok(());
    }

    let typing = ChatActionLoop::start(state.messenger.clone(), origin.here(), ChatAction::Typing);

    let image = match image_ref {
        Some(r) => match media::download(&bot, &r.file_id).await {
            Ok(bytes) => Some(InlineImage {
                mime_type: r.mime_type,
                bytes,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "image download failed");
                let _ = state
                    .messenger
                    .send_html(origin.reply(), "Unable to download the image.")
                    .await;
                return Ok(());
            }
        },
        None => None,
    };

    let system_prompt = state.prompts.active_prompt().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "active prompt unavailable, answering without one");
        String::new()
    });
    let req = TextRequest {
        model: cfg.text_model.clone(),
        system_prompt,
        prompt,
        history: context,
        image,
        safety: SafetyLevel::from_guild_flag(cfg.safety),
    };

    tracing::debug!(
        chat_id = origin.chat_id.0,
        topic = origin.topic.0,
        model = %req.model,
        context = req.history.len(),
        "generating reply"
    );
    let started = Instant::now();
    let result = state.model.generate_text(req).await;
    drop(typing);
    match result {
        Ok(generation) => {
            match send_generation(&state, &origin, &cfg, &generation, started).await {
                Ok(_) => {
                    state
                        .history
                        .record(origin.chat_id, origin.topic, &state.me.username, &generation.text)
                        .await;
                }
                Err(e) => tracing::warn!(error = %e, "failed to deliver reply"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "text generation failed");
            let _ = state
                .messenger
                .send_html(origin.reply(), &format!("❌ {}", escape_html(&e.to_string())))
                .await;
        }
    }

    Ok(())
}
