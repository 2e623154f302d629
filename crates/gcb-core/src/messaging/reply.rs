use std::time::Duration;

use crate::{
    domain::MessageRef,
    formatting::{escape_html, markdown_to_html, split_text_chunks},
    messaging::{port::MessagingPort, types::Destination},
    Result,
};

/// Upper bound for an unsplit reply, leaving room for HTML markup and a footer.
pub const MAX_SINGLE_MESSAGE: usize = 4000;

/// Pause between consecutive chunks of one reply.
pub const CHUNK_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Debug)]
pub struct ReplyOptions {
    /// Replies longer than this many characters count as long.
    pub word_threshold: usize,
    /// Hard per-message size for chunking.
    pub chunk_size: usize,
    /// Long replies become a reply chain under the triggering message.
    pub threads: bool,
    /// Appended to the last chunk (already HTML).
    pub footer_html: Option<String>,
    pub chunk_delay: Duration,
}

/// Send a model reply (markdown), chunked and formatted for the chat.
///
/// Returns the sent messages in order.
pub async fn deliver_reply(
    port: &dyn MessagingPort,
    to: Destination,
    markdown: &str,
    opts: &ReplyOptions,
) -> Result<Vec<MessageRef>> {
    let total = markdown.chars().count();
    let long = total > opts.word_threshold;
    let cap = port.capabilities().max_message_len.min(MAX_SINGLE_MESSAGE);
    // Short replies only split when they exceed what one message can carry.
    let size = if long {
        opts.chunk_size.min(cap)
    } else {
        opts.word_threshold.max(opts.chunk_size).min(cap)
    };
    let chunks = split_text_chunks(markdown, size);
    let last = chunks.len().saturating_sub(1);

    let mut sent = Vec::with_capacity(chunks.len() + 1);
    let mut target = to;

    if long && opts.threads && chunks.len() > 1 {
        let notice = format!(
            "<i>Response is too long ({total} chars), replying in a thread...</i>"
        );
        port.send_html(to, &notice).await?;
    }

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 && !opts.chunk_delay.is_zero() {
            tokio::time::sleep(opts.chunk_delay).await;
        }

        let mut html = markdown_to_html(chunk);
        if i == last {
            if let Some(footer) = &opts.footer_html {
                html.push_str("\n\n");
                html.push_str(footer);
            }
        }

        let msg = port.send_html(target, &html).await?;
        if long && opts.threads {
            target = target.replying_to(msg.message_id);
        }
        sent.push(msg);
    }

    Ok(sent)
}

/// Footer showing which model answered.
pub fn model_footer(model: &str) -> String {
    format!("<i>model: {}</i>", escape_html(model))
}

/// Footer with token counts.
pub fn usage_footer(input_tokens: u64, output_tokens: u64, elapsed: Duration) -> String {
    format!(
        "<i>tokens: {input_tokens} in / {output_tokens} out · {:.1}s</i>",
        elapsed.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{ChatId, MessageId},
        messaging::types::{ChatAction, InlineKeyboard, MessagingCapabilities},
    };

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Destination, String)>>,
    }

    #[async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
                max_callback_data_len: 64,
            }
        }

        async fn send_html(&self, to: Destination, html: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((to, html.to_string()));
            Ok(MessageRef {
                chat_id: to.chat_id,
                message_id: MessageId(100 + sent.len() as i32),
            })
        }

        async fn edit_html(&self, _msg: MessageRef, _html: &str) -> Result<()> {
            Ok(())
        }

        async fn send_chat_action(&self, _to: Destination, _action: ChatAction) -> Result<()> {
            Ok(())
        }

        async fn send_document(
            &self,
            _to: Destination,
            _file_name: &str,
            _bytes: Vec<u8>,
            _caption_html: Option<&str>,
        ) -> Result<MessageRef> {
            unreachable!()
        }

        async fn send_photo(
            &self,
            _to: Destination,
            _bytes: Vec<u8>,
            _caption_html: Option<&str>,
        ) -> Result<MessageRef> {
            unreachable!()
        }

        async fn send_inline_keyboard(
            &self,
            _to: Destination,
            _html: &str,
            _keyboard: InlineKeyboard,
        ) -> Result<MessageRef> {
            unreachable!()
        }

        async fn answer_callback_query(&self, _id: &str, _text: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    fn opts(threads: bool) -> ReplyOptions {
        ReplyOptions {
            word_threshold: 50,
            chunk_size: 100,
            threads,
            footer_html: Some("<i>model: m</i>".to_string()),
            chunk_delay: Duration::ZERO,
        }
    }

    fn origin() -> Destination {
        Destination::chat(ChatId(-1)).replying_to(MessageId(7))
    }

    fn long_text() -> String {
        (0..20).map(|i| format!("sentence {i}.")).collect::<Vec<_>>().join("\n")
    }

    #[tokio::test]
    async fn short_reply_is_one_message_with_footer() {
        let rec = Recorder::default();
        let sent = deliver_reply(&rec, origin(), "**hi**", &opts(true)).await.unwrap();
        assert_eq!(sent.len(), 1);

        let log = rec.sent.lock().unwrap();
        assert_eq!(log[0].1, "<b>hi</b>\n\n<i>model: m</i>");
        assert_eq!(log[0].0.reply_to, Some(MessageId(7)));
    }

    #[tokio::test]
    async fn long_reply_without_threads_is_flat() {
        let rec = Recorder::default();
        let sent = deliver_reply(&rec, origin(), &long_text(), &opts(false)).await.unwrap();
        assert!(sent.len() > 1);

        let log = rec.sent.lock().unwrap();
        assert!(log.iter().all(|(d, _)| d.reply_to == Some(MessageId(7))));
        assert!(log.last().unwrap().1.ends_with("<i>model: m</i>"));
        assert!(!log[0].1.contains("model: m"));
    }

    #[tokio::test]
    async fn long_reply_with_threads_forms_a_chain() {
        let rec = Recorder::default();
        let sent = deliver_reply(&rec, origin(), &long_text(), &opts(true)).await.unwrap();

        let log = rec.sent.lock().unwrap();
        assert!(log[0].1.contains("too long"));
        assert_eq!(log.len(), sent.len() + 1);
        // First chunk answers the trigger, each later chunk answers the previous one.
        assert_eq!(log[1].0.reply_to, Some(MessageId(7)));
        for i in 2..log.len() {
            assert_eq!(log[i].0.reply_to, Some(sent[i - 2].message_id));
        }
    }

    #[test]
    fn footers_escape_model_names() {
        assert_eq!(model_footer("a<b"), "<i>model: a&lt;b</i>");
        assert_eq!(
            usage_footer(10, 20, Duration::from_millis(1500)),
            "<i>tokens: 10 in / 20 out · 1.5s</i>"
        );
    }
}
