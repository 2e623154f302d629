//! Gemini adapter: implements the core `GenerativeModel` port over the
//! `models/{model}:generateContent` REST endpoint.

pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use gcb_core::{
    config::Config,
    errors::Error,
    model::{
        client::GenerativeModel,
        types::{GeneratedImage, Generation, ImageRequest, TextRequest},
    },
    Result,
};

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("gemini http client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.gemini_api_key, &cfg.gemini_api_base, cfg.request_timeout)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }

    async fn generate(&self, model: &str, body: &Value) -> Result<Value> {
        if model.trim().is_empty() {
            return Err(Error::Config("no model configured".to_string()));
        }

        tracing::debug!(model, "gemini generateContent");
        let resp = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("gemini request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = wire::error_message(&body);
            tracing::warn!(model, %status, error = %msg, "gemini request failed");
            return Err(Error::External(format!("gemini {status}: {msg}")));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("gemini json error: {e}")))
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate_text(&self, req: TextRequest) -> Result<Generation> {
        let body = wire::text_body(&req);
        let resp = self.generate(&req.model, &body).await?;
        wire::parse_generation(&resp, &req.model)
    }

    async fn generate_image(&self, req: ImageRequest) -> Result<GeneratedImage> {
        let body = wire::image_body(&req);
        let resp = self.generate(&req.model, &body).await?;
        wire::parse_image(&resp)
    }

    async fn search(&self, req: TextRequest) -> Result<Generation> {
        let body = wire::search_body(&req);
        let resp = self.generate(&req.model, &body).await?;
        wire::parse_generation(&resp, &req.model)
    }
}
