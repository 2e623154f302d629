//! Model output → Telegram HTML, and splitting long replies into message-sized chunks.

use std::sync::OnceLock;

use regex::Regex;

const FENCE: &str = "```";

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)```[A-Za-z0-9_+-]*\n?(.*?)```")
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"`([^`\n]+)`")
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\*\*([^*\n]+?)\*\*|__([^_\n]+?)__")
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(^|[^\w*])\*([^*\n]+?)\*|(^|[^\w])_([^_\n]+?)_")
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^#{1,6}\s+(.+?)\s*#*$")
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)")
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^(\s*)[-*]\s+")
}

/// Convert the markdown subset Gemini produces into Telegram HTML.
///
/// Code spans are lifted out before escaping and restored verbatim (escaped) at the end,
/// so emphasis markers inside code are left alone.
pub fn markdown_to_html(input: &str) -> String {
    let mut stash: Vec<String> = Vec::new();

    let text = fence_re().replace_all(input, |c: &regex::Captures<'_>| {
        stash.push(format!("<pre>{}</pre>", escape_html(c[1].trim_end_matches('\n'))));
        format!("\u{0}{}\u{0}", stash.len() - 1)
    });
    let text = inline_code_re().replace_all(&text, |c: &regex::Captures<'_>| {
        stash.push(format!("<code>{}</code>", escape_html(&c[1])));
        format!("\u{0}{}\u{0}", stash.len() - 1)
    });

    let text = escape_html(&text);
    let text = heading_re().replace_all(&text, "<b>$1</b>");
    let text = bullet_re().replace_all(&text, "${1}• ");
    let text = bold_re().replace_all(&text, |c: &regex::Captures<'_>| {
        let inner = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
        format!("<b>{inner}</b>")
    });
    let text = italic_re().replace_all(&text, |c: &regex::Captures<'_>| {
        let (lead, inner) = match (c.get(2), c.get(4)) {
            (Some(inner), _) => (c.get(1), inner),
            (None, Some(inner)) => (c.get(3), inner),
            (None, None) => return c[0].to_string(),
        };
        format!("{}<i>{}</i>", lead.map_or("", |m| m.as_str()), inner.as_str())
    });
    let text = link_re().replace_all(&text, r#"<a href="$2">$1</a>"#);

    let mut out = text.into_owned();
    for (i, html) in stash.iter().enumerate() {
        out = out.replace(&format!("\u{0}{i}\u{0}"), html);
    }
    out
}

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Breaks prefer a newline, then a space, inside the window. A piece that ends inside a
/// ``` fence is closed and the fence reopened in the next piece, so each piece renders
/// on its own.
pub fn split_text_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(FENCE.len() * 2 + 8);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut rest: &str = text;
    let mut reopen = false;

    while !rest.is_empty() {
        let prefix = if reopen { "```\n" } else { "" };
        // Leave room for the prefix and a closing fence.
        let budget = max_chars - prefix.len() - (FENCE.len() + 1);

        if prefix.chars().count() + rest.chars().count() <= max_chars {
            out.push(format!("{prefix}{rest}"));
            break;
        }

        let cut = break_point(rest, budget);
        let (head, tail) = rest.split_at(cut);
        let mut piece = format!("{prefix}{}", head.trim_end());
        let open = piece.matches(FENCE).count() % 2 == 1;
        if open {
            piece.push('\n');
            piece.push_str(FENCE);
        }
        out.push(piece);

        reopen = open;
        rest = tail.trim_start_matches('\n');
    }

    out.retain(|c| !c.trim().is_empty());
    out
}

/// Byte offset of the best break within the first `budget` characters of `s`.
fn break_point(s: &str, budget: usize) -> usize {
    let window_end = s
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let window = &s[..window_end];

    let min = window.len() / 2;
    if let Some(i) = window.rfind('\n').filter(|&i| i > min) {
        return i + 1;
    }
    if let Some(i) = window.rfind(' ').filter(|&i| i > min) {
        return i + 1;
    }
    window_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html(r#"<a href="x">&</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn converts_emphasis_headings_and_links() {
        assert_eq!(markdown_to_html("**bold** and *it*"), "<b>bold</b> and <i>it</i>");
        assert_eq!(markdown_to_html("## Title"), "<b>Title</b>");
        assert_eq!(markdown_to_html("- one\n- two"), "• one\n• two");
        assert_eq!(
            markdown_to_html("see [docs](https://example.com/a)"),
            r#"see <a href="https://example.com/a">docs</a>"#
        );
        assert_eq!(markdown_to_html("snake_case_name"), "snake_case_name");
    }

    #[test]
    fn code_is_escaped_but_not_formatted() {
        assert_eq!(
            markdown_to_html("```rust\nlet x = a**b** < 3;\n```"),
            "<pre>let x = a**b** &lt; 3;</pre>"
        );
        assert_eq!(markdown_to_html("use `*ptr` & go"), "use <code>*ptr</code> &amp; go");
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text_chunks("hello", 100), vec!["hello"]);
    }

    #[test]
    fn chunks_respect_limit_and_prefer_newlines() {
        let text = (0..30).map(|i| format!("line number {i}")).collect::<Vec<_>>().join("\n");
        let chunks = split_text_chunks(&text, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 100, "{c:?}");
            assert!(c.starts_with("line number"));
        }
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn chunks_reopen_code_fences() {
        let body = "x = 1\n".repeat(40);
        let text = format!("intro\n```\n{body}```\noutro");
        let chunks = split_text_chunks(&text, 80);
        assert!(chunks.len() > 2);
        for c in &chunks {
            assert!(c.chars().count() <= 80, "{c:?}");
            assert_eq!(c.matches(FENCE).count() % 2, 0, "{c:?}");
        }
        assert!(chunks[1].starts_with("```\n"));
    }

    #[test]
    fn unbroken_text_is_hard_cut() {
        let text = "a".repeat(250);
        let chunks = split_text_chunks(&text, 100);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert_eq!(chunks.concat(), text);
    }
}
