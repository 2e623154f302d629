use std::{sync::Arc, time::Instant};

use teloxide::prelude::*;

use gcb_core::{
    autocomplete::autocomplete,
    confirm::Decision,
    errors::{StoreError, StoreResult},
    formatting::escape_html,
    messaging::{
        reply::deliver_reply,
        types::{ChatAction, Destination, InlineKeyboard},
    },
    model::types::{ImageRequest, SafetyLevel, TextRequest},
    store::guild_config::{setting_kind, validate_guild_document, SettingKind, ALL_OPTIONS},
    utils::short_date,
};

use crate::{router::AppState, MAX_CAPTION_LEN};

use super::{
    media::{self, is_json_file_name, MAX_IMPORT_BYTES},
    relay::{reply_options, send_generation},
    store_error_html, ChatActionLoop, Origin,
};

const PREVIEW_CHARS: usize = 1000;
const LIST_LIMIT: usize = 10;
const RECENT_LIMIT: usize = 3;
const PICK_PREFIX: &str = "pick";

/// `/cmd@botname args` → (`cmd`, `Some("botname")`, `args`).
fn parse_command(text: &str) -> (String, Option<String>, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let mut head = first.trim_start_matches('/').splitn(2, '@');
    let cmd = head.next().unwrap_or("").to_lowercase();
    let target = head.next().filter(|t| !t.is_empty()).map(str::to_string);

    (cmd, target, rest)
}

/// What a suggestion button does when pressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pick {
    Switch,
    Preview,
    Delete,
    Option,
}

impl Pick {
    fn code(self) -> &'static str {
        match self {
            Pick::Switch => "sw",
            Pick::Preview => "pv",
            Pick::Delete => "del",
            Pick::Option => "opt",
        }
    }

    pub fn callback_data(self, name: &str) -> String {
        format!("{PICK_PREFIX}:{}:{name}", self.code())
    }

    pub fn parse(data: &str) -> Option<(Pick, String)> {
        let mut parts = data.splitn(3, ':');
        if parts.next()? != PICK_PREFIX {
            return None;
        }
        let pick = match parts.next()? {
            "sw" => Pick::Switch,
            "pv" => Pick::Preview,
            "del" => Pick::Delete,
            "opt" => Pick::Option,
            _ => return None,
        };
        let name = parts.next().filter(|n| !n.is_empty())?;
        Some((pick, name.to_string()))
    }
}

pub(crate) enum Reply {
    Html(String),
    Choices {
        html: String,
        keyboard: InlineKeyboard,
    },
}

pub(crate) async fn send_reply(state: &AppState, to: Destination, reply: Reply) {
    let res = match reply {
        Reply::Html(html) => state.messenger.send_html(to, &html).await.map(|_| ()),
        Reply::Choices { html, keyboard } => state
            .messenger
            .send_inline_keyboard(to, &html, keyboard)
            .await
            .map(|_| ()),
    };
    if let Err(e) = res {
        tracing::warn!(error = %e, "failed to send reply");
    }
}

async fn say(state: &AppState, origin: &Origin, html: &str) {
    send_reply(state, origin.reply(), Reply::Html(html.to_string())).await;
}

fn choices(state: &AppState, header: String, pick: Pick, names: Vec<String>) -> Reply {
    let max = state.messenger.capabilities().max_callback_data_len;
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| pick.callback_data(n).len() <= max)
        .collect();
    if names.is_empty() {
        return Reply::Html(header);
    }
    Reply::Choices {
        keyboard: InlineKeyboard::one_per_row(&names, |n| pick.callback_data(n)),
        html: header,
    }
}

/// Prompt names matching `partial` as buttons, or every name when nothing matches.
fn prompt_choices(state: &AppState, pick: Pick, partial: &str, header: String) -> Reply {
    let names = match state.prompts.prompt_names() {
        Ok(n) => n,
        Err(e) => return Reply::Html(store_error_html(&e)),
    };
    let mut matches = autocomplete(&names, partial);
    if matches.is_empty() {
        matches = autocomplete(&names, "");
    }
    choices(state, header, pick, matches)
}

fn option_choices(state: &AppState, partial: &str, header: String) -> Reply {
    let mut matches = autocomplete(ALL_OPTIONS, partial);
    if matches.is_empty() {
        matches = autocomplete(ALL_OPTIONS, "");
    }
    choices(state, header, Pick::Option, matches)
}

fn creator_html(created_by: &str) -> String {
    match created_by.parse::<i64>() {
        Ok(id) => format!(r#"<a href="tg://user?id={id}">{id}</a>"#),
        Err(_) => escape_html(created_by),
    }
}

fn help_text() -> String {
    [
        "<b>Gemini chat bot</b>",
        "",
        "Mention me, reply to me, or talk in the configured topic to get an answer.",
        "",
        "/config - show this chat's settings",
        "/config_edit &lt;option&gt; &lt;value&gt; - change a setting",
        "/config_export - download the settings as JSON",
        "/config_import - upload a JSON file with this as its caption",
        "/reset_config - restore default settings",
        "/prompt_create &lt;name&gt; &lt;content&gt; - add a system prompt",
        "/prompt_list - list system prompts",
        "/prompt_switch &lt;name&gt; - activate a prompt",
        "/prompt_preview &lt;name&gt; - show a prompt",
        "/prompt_delete &lt;name&gt; - delete a prompt",
        "/image &lt;prompt&gt; - generate an image",
        "/search &lt;prompt&gt; - answer with Google Search",
    ]
    .join("\n")
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    let (cmd, target, args) = parse_command(text);
    if let Some(t) = &target {
        if !t.eq_ignore_ascii_case(&state.me.username) {
            return Ok(());
        }
    }

    let origin = Origin::from_message(&msg);
    tracing::debug!(command = %cmd, chat_id = origin.chat_id.0, user_id = origin.user_id, "command");

    let reply = match cmd.as_str() {
        "start" | "help" => Some(Reply::Html(help_text())),
        "config" => Some(show_config(&state, &origin)),
        "config_edit" => Some(edit_config(&state, &origin, &args)),
        "config_export" => {
            export_config(&state, &origin).await;
            None
        }
        "config_import" => {
            import_config(&bot, &msg, &state, &origin).await;
            None
        }
        "reset_config" => {
            reset_config(&state, &origin).await;
            None
        }
        "prompt_create" => Some(create_prompt(&state, &origin, &args)),
        "prompt_list" => Some(list_prompts(&state)),
        "prompt_switch" => Some(switch_prompt(&state, &origin.user_key(), &args)),
        "prompt_preview" => Some(preview_prompt(&state, &args)),
        "prompt_delete" => Some(delete_prompt(&state, &origin.user_key(), &args)),
        "image" => {
            generate_image(&state, &origin, &args).await;
            None
        }
        "search" => {
            search(&state, &origin, &args).await;
            None
        }
        _ => None,
    };

    if let Some(r) = reply {
        send_reply(&state, origin.reply(), r).await;
    }
    Ok(())
}

// ---- config ----

fn show_config(state: &AppState, origin: &Origin) -> Reply {
    let cfg = match state.configs.guild_config(&origin.guild()) {
        Ok(c) => c,
        Err(e) => return Reply::Html(store_error_html(&e)),
    };
    let mut out = "<b>⚙️ Config for this chat</b>\n".to_string();
    for (option, value) in cfg.display_rows() {
        out.push_str(&format!("\n<code>{option}</code>: {}", escape_html(&value)));
    }
    out.push_str("\n\nChange a value with /config_edit &lt;option&gt; &lt;value&gt;");
    Reply::Html(out)
}

pub(crate) fn describe_option(state: &AppState, origin: &Origin, option: &str) -> Reply {
    let Some(kind) = setting_kind(option) else {
        return option_choices(
            state,
            option,
            format!("❌ Unknown setting <code>{}</code>.", escape_html(option)),
        );
    };
    let cfg = match state.configs.guild_config(&origin.guild()) {
        Ok(c) => c,
        Err(e) => return Reply::Html(store_error_html(&e)),
    };
    let current = cfg
        .display_rows()
        .into_iter()
        .find(|(k, _)| *k == option)
        .map(|(_, v)| v)
        .unwrap_or_default();
    let hint = match kind {
        SettingKind::Int if option == "set_channel" => {
            "a topic id (0 = the general chat)".to_string()
        }
        SettingKind::Int => "a whole number (negative values become 0)".to_string(),
        SettingKind::Bool => "true or false (also 1/0, yes/no, on/off)".to_string(),
        SettingKind::Str => "a model name".to_string(),
    };
    Reply::Html(format!(
        "<code>{option}</code> is <code>{}</code>\nExpected: {hint}\n\nUsage: /config_edit {option} &lt;value&gt;",
        escape_html(&current)
    ))
}

fn edit_config(state: &AppState, origin: &Origin, args: &str) -> Reply {
    let mut parts = args.splitn(2, char::is_whitespace);
    let option = parts.next().unwrap_or("").trim();
    let value = parts.next().unwrap_or("").trim();

    if option.is_empty() {
        return option_choices(
            state,
            "",
            "Usage: /config_edit &lt;option&gt; &lt;value&gt;\nPick an option:".to_string(),
        );
    }
    if value.is_empty() || setting_kind(option).is_none() {
        return describe_option(state, origin, option);
    }

    match state.configs.edit_field(&origin.guild(), option, value) {
        Ok(cfg) => {
            let shown = cfg
                .display_rows()
                .into_iter()
                .find(|(k, _)| *k == option)
                .map(|(_, v)| v)
                .unwrap_or_default();
            tracing::info!(chat_id = origin.chat_id.0, option, "config updated");
            Reply::Html(format!(
                "✅ Updated <code>{option}</code> → <code>{}</code>",
                escape_html(&shown)
            ))
        }
        Err(e @ StoreError::UnknownOption(_)) => {
            option_choices(state, option, store_error_html(&e))
        }
        Err(e) => Reply::Html(store_error_html(&e)),
    }
}

async fn export_config(state: &AppState, origin: &Origin) {
    let guild = origin.guild();
    let exported = state
        .configs
        .read()
        .map_err(StoreError::from)
        .and_then(|root| state.configs.export_guild(&root, &guild));
    let json = match exported {
        Ok(j) => j,
        Err(e) => return say(state, origin, &store_error_html(&e)).await,
    };

    let _ = state
        .messenger
        .send_chat_action(origin.here(), ChatAction::UploadDocument)
        .await;
    let file_name = format!("{guild}_config.json");
    if let Err(e) = state
        .messenger
        .send_document(
            origin.reply(),
            &file_name,
            json.into_bytes(),
            Some("Config export. Edit it and send it back with /config_import as the caption."),
        )
        .await
    {
        tracing::warn!(error = %e, "config export failed");
        say(state, origin, "❌ Could not send the export file.").await;
    }
}

/// Ask the requester to confirm, then run `apply` in the background.
///
/// The wait runs in its own task: updates from one chat are handled in order, so
/// blocking here would also hold back the button press that answers it.
async fn confirm_then<F>(state: &Arc<AppState>, origin: &Origin, question_html: String, apply: F)
where
    F: FnOnce(&AppState) -> StoreResult<String> + Send + 'static,
{
    let (id, pending) = state
        .confirmations
        .request_for(origin.user_id, state.cfg.confirm_timeout);
    let prompt = match state
        .messenger
        .send_inline_keyboard(origin.reply(), &question_html, InlineKeyboard::confirm(id))
        .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to send confirmation prompt");
            return;
        }
    };

    let state = state.clone();
    tokio::spawn(async move {
        let decision = pending.wait().await;
        tracing::info!(confirmation = id, ?decision, "confirmation finished");
        let outcome = match decision {
            Decision::Confirmed => match apply(&state) {
                Ok(done) => done,
                Err(e) => store_error_html(&e),
            },
            Decision::Declined => "Cancelled. Nothing changed.".to_string(),
            Decision::TimedOut => "⌛ No answer in time. Nothing changed.".to_string(),
        };
        if let Err(e) = state.messenger.edit_html(prompt, &outcome).await {
            tracing::warn!(error = %e, "failed to update confirmation prompt");
        }
    });
}

async fn import_config(bot: &Bot, msg: &Message, state: &Arc<AppState>, origin: &Origin) {
    let Some(doc) = msg.document() else {
        return say(
            state,
            origin,
            "Send a <code>.json</code> file with <code>/config_import</code> as its caption.",
        )
        .await;
    };
    let file_name = doc.file_name.clone().unwrap_or_default();
    if !is_json_file_name(&file_name) {
        return say(state, origin, "❌ Please upload a <code>.json</code> file.").await;
    }
    if doc.file.size > MAX_IMPORT_BYTES {
        return say(state, origin, "❌ That file is too large for a config.").await;
    }

    let bytes = match media::download(bot, &doc.file.id).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "config import download failed");
            return say(state, origin, "❌ Could not download the file.").await;
        }
    };
    let Ok(document) = String::from_utf8(bytes) else {
        return say(state, origin, "❌ The file is not UTF-8 text.").await;
    };

    // Check now so the user is never asked to confirm a document that cannot apply.
    let checked = serde_json::from_str::<serde_json::Value>(&document)
        .map_err(StoreError::from)
        .and_then(|v| validate_guild_document(&v));
    if let Err(e) = checked {
        return say(state, origin, &store_error_html(&e)).await;
    }

    let guild = origin.guild();
    let question = format!(
        "⚠️ Replace the <b>entire</b> config of this chat with <code>{}</code>?",
        escape_html(&file_name)
    );
    confirm_then(state, origin, question, move |st| {
        st.configs.update(|root| {
            st.configs.import_guild(root, &guild, &document)?;
            Ok(((), true))
        })?;
        tracing::info!(guild = %guild, "config imported");
        Ok("✅ Config imported.".to_string())
    })
    .await;
}

async fn reset_config(state: &Arc<AppState>, origin: &Origin) {
    let guild = origin.guild();
    match state.configs.read() {
        Ok(root) if !root.contains(&guild) => {
            return say(state, origin, "No config found for this server.").await;
        }
        Ok(_) => {}
        Err(e) => return say(state, origin, &store_error_html(&StoreError::from(e))).await,
    }

    let question = "⚠️ Reset this chat's config to the defaults?".to_string();
    confirm_then(state, origin, question, move |st| {
        st.configs.update(|root| {
            st.configs.reset_guild(root, &guild)?;
            Ok(((), true))
        })?;
        tracing::info!(guild = %guild, "config reset");
        Ok("✅ Config reset to defaults.".to_string())
    })
    .await;
}

// ---- prompts ----

fn create_prompt(state: &AppState, origin: &Origin, args: &str) -> Reply {
    let mut parts = args.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").trim();
    let content = parts.next().unwrap_or("").trim();
    if name.is_empty() || content.is_empty() {
        return Reply::Html("Usage: /prompt_create &lt;name&gt; &lt;content&gt;".to_string());
    }

    match state.prompts.add_prompt(name, content, &origin.user_key()) {
        Ok(()) => {
            tracing::info!(name, user_id = origin.user_id, "prompt created");
            Reply::Html(format!(
                "✅ Created system prompt: <b>{}</b>",
                escape_html(name)
            ))
        }
        Err(e) => Reply::Html(store_error_html(&e)),
    }
}

fn list_prompts(state: &AppState) -> Reply {
    let reg = match state.prompts.load() {
        Ok(r) => r,
        Err(e) => return Reply::Html(store_error_html(&StoreError::from(e))),
    };
    let active = reg.effective_active_name();

    let mut out = "<b>System Prompts:</b>".to_string();
    for p in reg.prompts.values().take(LIST_LIMIT) {
        let status = if p.name == active {
            "🟢 <b>ACTIVE</b>"
        } else {
            "⚪"
        };
        out.push_str(&format!(
            "\n\n{status} <code>{}</code>\nBy: {} · Used: {} times · Created: {}",
            escape_html(&p.name),
            creator_html(&p.created_by),
            p.usage_count,
            escape_html(&short_date(&p.created_at)),
        ));
    }
    if reg.prompts.len() > LIST_LIMIT {
        out.push_str(&format!(
            "\n\n<i>{} more not shown</i>",
            reg.prompts.len() - LIST_LIMIT
        ));
    }

    let recent = reg.recent(RECENT_LIMIT);
    if !recent.is_empty() {
        let chain = recent
            .iter()
            .map(|n| format!("<code>{}</code>", escape_html(n)))
            .collect::<Vec<_>>()
            .join(" → ");
        out.push_str(&format!("\n\n🕒 <b>Recently Used</b>\n{chain}"));
    }
    Reply::Html(out)
}

pub(crate) fn switch_prompt(state: &AppState, user_key: &str, name: &str) -> Reply {
    if name.is_empty() {
        return prompt_choices(state, Pick::Switch, "", "Pick a prompt to switch to:".to_string());
    }
    match state.prompts.set_active_prompt(name, user_key) {
        Ok(true) => {
            tracing::info!(name, "active prompt switched");
            Reply::Html(format!("✅ Switched to prompt: <b>{}</b>", escape_html(name)))
        }
        Ok(false) => prompt_choices(
            state,
            Pick::Switch,
            name,
            format!("❌ Prompt '{}' not found. Pick one:", escape_html(name)),
        ),
        Err(e) => Reply::Html(store_error_html(&e)),
    }
}

pub(crate) fn preview_prompt(state: &AppState, name: &str) -> Reply {
    if name.is_empty() {
        return prompt_choices(state, Pick::Preview, "", "Pick a prompt to preview:".to_string());
    }
    match state.prompts.prompt_by_name(name) {
        Ok(Some(p)) => {
            let body = if p.content.is_empty() {
                "(empty)".to_string()
            } else {
                p.preview(PREVIEW_CHARS)
            };
            Reply::Html(format!(
                "📋 <b>Preview: {}</b>\n<pre>{}</pre>\nCreated by: {}\nUsage count: {}",
                escape_html(&p.name),
                escape_html(&body),
                creator_html(&p.created_by),
                p.usage_count
            ))
        }
        Ok(None) => prompt_choices(
            state,
            Pick::Preview,
            name,
            format!("❌ Prompt '{}' not found.", escape_html(name)),
        ),
        Err(e) => Reply::Html(store_error_html(&e)),
    }
}

pub(crate) fn delete_prompt(state: &AppState, user_key: &str, name: &str) -> Reply {
    if name.is_empty() {
        return prompt_choices(state, Pick::Delete, "", "Pick a prompt to delete:".to_string());
    }
    match state.prompts.delete_prompt(name, user_key) {
        Ok(true) => {
            tracing::info!(name, "prompt deleted");
            Reply::Html(format!("✅ Deleted prompt: <b>{}</b>", escape_html(name)))
        }
        Ok(false) => Reply::Html(format!("❌ Prompt '{}' not found", escape_html(name))),
        Err(e) => Reply::Html(store_error_html(&e)),
    }
}

// ---- generation ----

async fn generate_image(state: &AppState, origin: &Origin, prompt: &str) {
    if prompt.is_empty() {
        return say(state, origin, "Usage: /image &lt;description&gt;").await;
    }
    let cfg = match state.configs.guild_config(&origin.guild()) {
        Ok(c) => c,
        Err(e) => return say(state, origin, &store_error_html(&e)).await,
    };

    let uploading = ChatActionLoop::start(state.messenger.clone(), origin.here(), ChatAction::UploadPhoto);
    let req = ImageRequest {
        model: cfg.image_model.clone(),
        prompt: prompt.to_string(),
        safety: SafetyLevel::from_guild_flag(cfg.safety),
    };
    let generated = state.model.generate_image(req).await;
    drop(uploading);
    let img = match generated {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(error = %e, model = %cfg.image_model, "image generation failed");
            return say(state, origin, "❌ Couldn't generate an image for that prompt.").await;
        }
    };

    let opts = reply_options(state, &cfg, None);
    let fits = img.caption.chars().count() <= opts.word_threshold.min(MAX_CAPTION_LEN);
    let caption = fits.then(|| escape_html(&img.caption));
    if let Err(e) = state
        .messenger
        .send_photo(origin.reply(), img.bytes, caption.as_deref())
        .await
    {
        tracing::warn!(error = %e, "failed to send generated image");
        return say(state, origin, "❌ Could not send the generated image.").await;
    }
    if !fits {
        if let Err(e) = deliver_reply(state.messenger.as_ref(), origin.reply(), &img.caption, &opts).await {
            tracing::warn!(error = %e, "failed to send image caption");
        }
    }
}

async fn search(state: &AppState, origin: &Origin, prompt: &str) {
    if prompt.is_empty() {
        return say(state, origin, "Usage: /search &lt;question&gt;").await;
    }
    let cfg = match state.configs.guild_config(&origin.guild()) {
        Ok(c) => c,
        Err(e) => return say(state, origin, &store_error_html(&e)).await,
    };

    say(state, origin, "🔎 Searching...").await;
    let typing = ChatActionLoop::start(state.messenger.clone(), origin.here(), ChatAction::Typing);

    let system_prompt = state.prompts.active_prompt().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "active prompt unavailable, searching without one");
        String::new()
    });
    let req = TextRequest {
        model: cfg.text_model.clone(),
        system_prompt,
        prompt: prompt.to_string(),
        history: Vec::new(),
        image: None,
        safety: SafetyLevel::from_guild_flag(cfg.safety),
    };

    let started = Instant::now();
    let result = state.model.search(req).await;
    drop(typing);
    match result {
        Ok(generation) => {
            if let Err(e) = send_generation(state, origin, &cfg, &generation, started).await {
                tracing::warn!(error = %e, "failed to deliver search answer");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "search failed");
            say(
                state,
                origin,
                &format!("❌ Search failed: {}", escape_html(&e.to_string())),
            )
            .await;
        }
    }
}
