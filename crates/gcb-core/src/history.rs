use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use crate::domain::{ChatId, TopicId};

/// Hard cap per (chat, topic), independent of any guild's `max_history`.
pub const BUFFER_CAP: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub author: String,
    pub text: String,
}

/// Recent messages per (chat, topic), kept in memory only.
///
/// Telegram bots cannot page back through a chat, so context for the model is
/// whatever the bot has seen since it started.
#[derive(Default)]
pub struct ChatHistory {
    buffers: Mutex<HashMap<(ChatId, TopicId), VecDeque<HistoryEntry>>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, chat: ChatId, topic: TopicId, author: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let mut map = self.buffers.lock().await;
        let buf = map.entry((chat, topic)).or_default();
        buf.push_back(HistoryEntry {
            author: author.to_string(),
            text: text.to_string(),
        });
        while buf.len() > BUFFER_CAP {
            buf.pop_front();
        }
    }

    /// The last `limit` messages as `"<author>:  <text>"` lines, oldest first.
    ///
    /// Call before recording the triggering message so it is not part of its own context.
    pub async fn context_lines(&self, chat: ChatId, topic: TopicId, limit: usize) -> Vec<String> {
        let map = self.buffers.lock().await;
        let Some(buf) = map.get(&(chat, topic)) else {
            return Vec::new();
        };
        let skip = buf.len().saturating_sub(limit);
        buf.iter()
            .skip(skip)
            .map(|e| format!("{}:  {}", e.author, e.text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: ChatId = ChatId(-100);
    const GENERAL: TopicId = TopicId(0);

    #[tokio::test]
    async fn yields_last_n_oldest_first() {
        let h = ChatHistory::new();
        for i in 0..5 {
            h.record(CHAT, GENERAL, "ann", &format!("m{i}")).await;
        }
        assert_eq!(
            h.context_lines(CHAT, GENERAL, 2).await,
            vec!["ann:  m3", "ann:  m4"]
        );
        assert_eq!(h.context_lines(CHAT, GENERAL, 50).await.len(), 5);
        assert!(h.context_lines(CHAT, GENERAL, 0).await.is_empty());
    }

    #[tokio::test]
    async fn topics_are_separate() {
        let h = ChatHistory::new();
        h.record(CHAT, GENERAL, "a", "hello").await;
        h.record(CHAT, TopicId(9), "b", "other").await;
        h.record(CHAT, GENERAL, "c", "   ").await;

        assert_eq!(h.context_lines(CHAT, GENERAL, 10).await, vec!["a:  hello"]);
        assert_eq!(h.context_lines(CHAT, TopicId(9), 10).await, vec!["b:  other"]);
        assert!(h.context_lines(ChatId(5), GENERAL, 10).await.is_empty());
    }

    #[tokio::test]
    async fn buffer_is_capped() {
        let h = ChatHistory::new();
        for i in 0..(BUFFER_CAP + 20) {
            h.record(CHAT, GENERAL, "x", &i.to_string()).await;
        }
        let lines = h.context_lines(CHAT, GENERAL, usize::MAX).await;
        assert_eq!(lines.len(), BUFFER_CAP);
        assert_eq!(lines[0], "x:  20");
    }
}
