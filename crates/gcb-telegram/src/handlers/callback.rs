use std::sync::Arc;

use teloxide::{prelude::*, types::CallbackQuery};

use gcb_core::confirm::{parse_callback_data, Resolution};

use crate::router::AppState;

use super::{
    commands::{delete_prompt, describe_option, preview_prompt, send_reply, switch_prompt, Pick},
    Origin,
};

async fn answer(state: &AppState, callback_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(callback_id, text).await {
        tracing::debug!(error = %e, "answer_callback_query failed");
    }
}

pub async fn handle_callback(_bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();
    let user_id = q.from.id.0 as i64;

    if let Some((id, confirmed)) = parse_callback_data(&data) {
        let text = match state.confirmations.resolve_by(id, user_id, confirmed) {
            Resolution::Accepted if confirmed => "Confirmed",
            Resolution::Accepted => "Cancelled",
            Resolution::Stale => "This confirmation has expired.",
            Resolution::NotOwner => "Only the requester can answer.",
        };
        tracing::debug!(confirmation = id, user_id, confirmed, answer = text, "confirmation button");
        answer(&state, &q.id, Some(text)).await;
        return Ok(());
    }

    let Some((pick, name)) = Pick::parse(&data) else {
        tracing::debug!(data = %data, "ignoring unknown callback data");
        answer(&state, &q.id, None).await;
        return Ok(());
    };
    answer(&state, &q.id, None).await;

    let Some(msg) = q.message.as_ref() else {
        return Ok(());
    };
    if !state.cfg.is_chat_allowed(msg.chat.id.0) {
        return Ok(());
    }

    // The button sits on the bot's own message; act as the user who pressed it.
    let mut origin = Origin::from_message(msg);
    origin.user_id = user_id;
    origin.author = q.from.full_name();

    let reply = match pick {
        Pick::Switch => switch_prompt(&state, &origin.user_key(), &name),
        Pick::Preview => preview_prompt(&state, &name),
        Pick::Delete => delete_prompt(&state, &origin.user_key(), &name),
        Pick::Option => describe_option(&state, &origin, &name),
    };
    send_reply(&state, origin.reply(), reply).await;
    Ok(())
}
