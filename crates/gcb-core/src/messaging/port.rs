use async_trait::async_trait;

use crate::{
    domain::MessageRef,
    messaging::types::{ChatAction, Destination, InlineKeyboard, MessagingCapabilities},
    Result,
};

/// Outbound side of the chat gateway.
///
/// All text arguments are Telegram-flavoured HTML; callers escape user content.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, to: Destination, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    async fn send_chat_action(&self, to: Destination, action: ChatAction) -> Result<()>;

    async fn send_document(
        &self,
        to: Destination,
        file_name: &str,
        bytes: Vec<u8>,
        caption_html: Option<&str>,
    ) -> Result<MessageRef>;

    async fn send_photo(
        &self,
        to: Destination,
        bytes: Vec<u8>,
        caption_html: Option<&str>,
    ) -> Result<MessageRef>;

    async fn send_inline_keyboard(
        &self,
        to: Destination,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
