//! Telegram adapter (teloxide).
//!
//! Implements the `gcb-core` MessagingPort over the Bot API and hosts the command
//! router. A Telegram group chat is a guild; its forum topics are the channels.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use gcb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Destination, InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Telegram caption limit for photos and documents.
pub const MAX_CAPTION_LEN: usize = 1024;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn tg_thread(to: &Destination) -> Option<i32> {
        to.topic.and_then(|t| i32::try_from(t.0).ok())
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    fn sent(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!(wait = ?d, "telegram rate limit, retrying");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

fn keyboard_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: 4096,
            max_callback_data_len: 64,
        }
    }

    async fn send_html(&self, to: Destination, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(to.chat_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                if let Some(thread) = Self::tg_thread(&to) {
                    req = req.message_thread_id(thread);
                }
                if let Some(reply) = to.reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(reply))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(Self::sent(to.chat_id, &msg))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_chat_action(&self, to: Destination, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
            ChatAction::UploadPhoto => teloxide::types::ChatAction::UploadPhoto,
            ChatAction::UploadDocument => teloxide::types::ChatAction::UploadDocument,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(to.chat_id), tg_action))
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        to: Destination,
        file_name: &str,
        bytes: Vec<u8>,
        caption_html: Option<&str>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let file = InputFile::memory(bytes.clone()).file_name(file_name.to_string());
                let mut req = self.bot.send_document(Self::tg_chat(to.chat_id), file);
                if let Some(c) = caption_html {
                    req = req.caption(c.to_string()).parse_mode(ParseMode::Html);
                }
                if let Some(thread) = Self::tg_thread(&to) {
                    req = req.message_thread_id(thread);
                }
                if let Some(reply) = to.reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(reply))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(Self::sent(to.chat_id, &msg))
    }

    async fn send_photo(
        &self,
        to: Destination,
        bytes: Vec<u8>,
        caption_html: Option<&str>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let file = InputFile::memory(bytes.clone()).file_name("image.png");
                let mut req = self.bot.send_photo(Self::tg_chat(to.chat_id), file);
                if let Some(c) = caption_html {
                    req = req.caption(c.to_string()).parse_mode(ParseMode::Html);
                }
                if let Some(thread) = Self::tg_thread(&to) {
                    req = req.message_thread_id(thread);
                }
                if let Some(reply) = to.reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(reply))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(Self::sent(to.chat_id, &msg))
    }

    async fn send_inline_keyboard(
        &self,
        to: Destination,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = keyboard_markup(keyboard);
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(to.chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone());
                if let Some(thread) = Self::tg_thread(&to) {
                    req = req.message_thread_id(thread);
                }
                if let Some(reply) = to.reply_to {
                    req = req
                        .reply_to_message_id(Self::tg_msg_id(reply))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;
        Ok(Self::sent(to.chat_id, &msg))
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}
