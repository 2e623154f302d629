use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use gcb_core::{
    config::Config,
    confirm::ConfirmationGate,
    history::ChatHistory,
    messaging::port::MessagingPort,
    model::client::GenerativeModel,
    store::{guild_config::ConfigStore, prompts::PromptStore},
};

use crate::handlers;
use crate::TelegramMessenger;

/// Who the bot is, for mention and reply detection.
#[derive(Clone, Debug, Default)]
pub struct BotIdentity {
    pub user_id: u64,
    pub username: String,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub prompts: Arc<PromptStore>,
    pub configs: Arc<ConfigStore>,
    pub model: Arc<dyn GenerativeModel>,
    pub messenger: Arc<dyn MessagingPort>,
    pub confirmations: Arc<ConfirmationGate>,
    pub history: Arc<ChatHistory>,
    pub me: BotIdentity,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    prompts: Arc<PromptStore>,
    configs: Arc<ConfigStore>,
    model: Arc<dyn GenerativeModel>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    let me = BotIdentity {
        user_id: me.id.0,
        username: me.username().to_string(),
    };
    tracing::info!(username = %me.username, "bot started");
    tracing::info!(
        prompts = %prompts.path().display(),
        config = %configs.path().display(),
        allowed_chats = cfg.allowed_chats.len(),
        "stores ready"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));

    let state = Arc::new(AppState {
        cfg,
        prompts,
        configs,
        model,
        messenger,
        confirmations: Arc::new(ConfirmationGate::new()),
        history: Arc::new(ChatHistory::new()),
        me,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
