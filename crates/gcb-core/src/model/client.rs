use async_trait::async_trait;

use crate::Result;

use super::types::*;

/// Generative backend used by the chat handlers.
///
/// Implementations map provider failures to `Error::External`; an empty or blocked
/// answer is an error, never an empty `Generation`.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate_text(&self, req: TextRequest) -> Result<Generation>;

    /// Image plus a caption; a response missing either is an error.
    async fn generate_image(&self, req: ImageRequest) -> Result<GeneratedImage>;

    /// Text answer grounded with web search.
    async fn search(&self, req: TextRequest) -> Result<Generation>;
}
