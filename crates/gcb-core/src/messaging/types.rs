use crate::{
    confirm,
    domain::{ChatId, MessageId, TopicId},
};

/// Where an outgoing message goes: a chat, optionally a forum topic, optionally as a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: ChatId,
    pub topic: Option<TopicId>,
    pub reply_to: Option<MessageId>,
}

impl Destination {
    pub fn chat(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            topic: None,
            reply_to: None,
        }
    }

    /// Topic `0` is the chat's general area and is not sent as a thread id.
    pub fn in_topic(mut self, topic: TopicId) -> Self {
        self.topic = (topic.0 != 0).then_some(topic);
        self
    }

    pub fn replying_to(mut self, msg: MessageId) -> Self {
        self.reply_to = Some(msg);
        self
    }
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
    UploadDocument,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

/// Inline keyboard, row by row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Confirm / Cancel on one row, wired to a pending confirmation.
    pub fn confirm(id: u64) -> Self {
        Self {
            rows: vec![vec![
                InlineButton {
                    label: "✅ Confirm".to_string(),
                    callback_data: confirm::callback_data(id, true),
                },
                InlineButton {
                    label: "❌ Cancel".to_string(),
                    callback_data: confirm::callback_data(id, false),
                },
            ]],
        }
    }

    /// One button per row; `callback_for` builds each button's payload from its label.
    pub fn one_per_row<F>(labels: &[String], callback_for: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            rows: labels
                .iter()
                .map(|l| {
                    vec![InlineButton {
                        label: l.clone(),
                        callback_data: callback_for(l),
                    }]
                })
                .collect(),
        }
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
    pub max_callback_data_len: usize,
}
