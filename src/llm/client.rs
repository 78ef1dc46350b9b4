use async_trait::async_trait;

use crate::error::InferenceError;

/// Which provider model a completion should run against. The engine picks the
/// role; the client maps roles to concrete model identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Text-only caption generation.
    Text,
    /// Image-grounded calls (fact extraction, image captioning).
    Vision,
    /// Degraded open-model path used when the primary vision model is out.
    Fallback,
    /// Binary NSFW classification.
    Classifier,
}

/// Inline image attached to a completion request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One inference round-trip. `json` asks the provider for strictly-structured
/// JSON output; the raw response text still goes through parse+validate on
/// the caller side since providers do not always honor it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub role: ModelRole,
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: Option<InlineImage>,
    pub json: bool,
}

impl CompletionRequest {
    pub fn text(role: ModelRole, system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        CompletionRequest {
            role,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            image: None,
            json: false,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// The replaceable inference capability. Everything the pipeline knows about
/// the provider goes through this seam so tests can substitute a mock.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError>;

    /// Provider label carried into `GenerationResult::provider`.
    fn provider_name(&self) -> &str;
}
