use std::sync::Arc;

use gcb_gemini::GeminiClient;

use gcb_core::{
    config::Config,
    model::client::GenerativeModel,
    store::{guild_config::ConfigStore, prompts::PromptStore},
};

#[tokio::main]
async fn main() -> Result<(), gcb_core::Error> {
    gcb_core::logging::init("gcb")?;

    let cfg = Arc::new(Config::load()?);

    let prompts = Arc::new(PromptStore::open(cfg.prompts_file.clone())?);
    let configs = Arc::new(ConfigStore::open(cfg.config_file.clone(), cfg.guild_defaults())?);
    tracing::info!(
        text_model = %cfg.text_model,
        image_model = %cfg.image_model,
        "stores opened"
    );

    let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::from_config(&cfg)?);

    gcb_telegram::router::run_polling(cfg, prompts, configs, model)
        .await
        .map_err(|e| gcb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
