//! Telegram update handlers.
//!
//! Commands and callback buttons act on the stores; every other message goes through
//! the relay, which decides whether the bot was addressed.

use std::{sync::Arc, time::Duration};

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use gcb_core::{
    domain::{ChatId, GuildId, MessageId, TopicId},
    errors::StoreError,
    formatting::escape_html,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Destination},
    },
};
use tokio_util::sync::CancellationToken;

use crate::router::AppState;

mod callback;
mod commands;
mod media;
mod relay;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !state.cfg.is_chat_allowed(msg.chat.id.0) {
        tracing::debug!(chat_id = msg.chat.id.0, "ignoring message from chat not in ALLOWED_CHATS");
        return Ok(());
    }
    if msg.from().map_or(true, |u| u.is_bot) {
        return Ok(());
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    relay::handle_relay(bot, msg, state).await
}

/// Where a message came from and who sent it.
#[derive(Clone, Debug)]
pub(crate) struct Origin {
    pub chat_id: ChatId,
    pub topic: TopicId,
    pub message_id: MessageId,
    pub user_id: i64,
    pub author: String,
}

impl Origin {
    pub fn from_message(msg: &Message) -> Self {
        let (user_id, author) = msg
            .from()
            .map(|u| (u.id.0 as i64, u.full_name()))
            .unwrap_or((0, "unknown".to_string()));
        Self {
            chat_id: ChatId(msg.chat.id.0),
            topic: TopicId(msg.thread_id.map(i64::from).unwrap_or(0)),
            message_id: MessageId(msg.id.0),
            user_id,
            author,
        }
    }

    pub fn guild(&self) -> GuildId {
        GuildId::from(self.chat_id)
    }

    /// Stored as `created_by` / `used_by`.
    pub fn user_key(&self) -> String {
        self.user_id.to_string()
    }

    /// Same chat and topic, as a reply to the originating message.
    pub fn reply(&self) -> Destination {
        Destination::chat(self.chat_id)
            .in_topic(self.topic)
            .replying_to(self.message_id)
    }

    /// Same chat and topic, not a reply.
    pub fn here(&self) -> Destination {
        Destination::chat(self.chat_id).in_topic(self.topic)
    }
}

/// Telegram clears a chat action after about five seconds.
const CHAT_ACTION_EVERY: Duration = Duration::from_secs(4);

/// Repeats a chat action until dropped.
pub(crate) struct ChatActionLoop {
    cancel: CancellationToken,
}

impl ChatActionLoop {
    pub fn start(port: Arc<dyn MessagingPort>, to: Destination, action: ChatAction) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CHAT_ACTION_EVERY);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let _ = port.send_chat_action(to, action).await;
                    }
                }
            }
        });
        Self { cancel }
    }
}

impl Drop for ChatActionLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// User-facing text for a store failure. Persistence failures are logged, not shown.
pub(crate) fn store_error_html(e: &StoreError) -> String {
    match e {
        StoreError::Persistence(inner) => {
            tracing::error!(error = %inner, "store failure");
            "❌ Could not read or save the data file. Check the bot logs.".to_string()
        }
        StoreError::InvalidName { .. } => {
            "❌ Prompt name must not contain spaces and must be at most 50 characters.".to_string()
        }
        other => format!("❌ {}", escape_html(&other.to_string())),
    }
}
