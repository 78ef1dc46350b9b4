use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::CaptionError;
use crate::llm::client::{CompletionClient, CompletionRequest, ModelRole};
use crate::llm::media::load_image;
use crate::pipeline::facts::{extract_facts, ImageFacts};
use crate::pipeline::fallback::{nsfw_caption_fallback, FallbackCaption};
use crate::pipeline::prompt::{build_generation_prompt, Grounding, GENERATION_SYSTEM_PROMPT};
use crate::pipeline::rank::{rank, Selection};
use crate::pipeline::schema::parse_and_validate;
use crate::pipeline::{GenerationRequest, GenerationResult, Payload, PromotionMode, Ranked};
use crate::utils::timing::RequestTimer;
use crate::utils::truncate_for_log;

const HINT_MAX_CHARS: usize = 600;

/// Stateless generation engine: one instance serves concurrent requests, all
/// per-request state lives on the stack of the call.
pub struct CaptionEngine {
    client: Arc<dyn CompletionClient>,
    config: EngineConfig,
}

impl CaptionEngine {
    pub fn new(client: Arc<dyn CompletionClient>, config: EngineConfig) -> Self {
        CaptionEngine { client, config }
    }

    /// Image-grounded pipeline: load + verify the image, extract facts once,
    /// then run the shared attempt loop grounded on those facts.
    pub async fn generate_from_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, CaptionError> {
        if !matches!(request.payload, Payload::Image(_)) {
            return Err(CaptionError::Configuration(
                "generate_from_image requires an image payload".to_string(),
            ));
        }
        self.generate(request).await
    }

    /// Text-theme pipeline.
    pub async fn generate_from_text(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, CaptionError> {
        if !matches!(request.payload, Payload::Text { .. }) {
            return Err(CaptionError::Configuration(
                "generate_from_text requires a theme payload".to_string(),
            ));
        }
        self.generate(request).await
    }

    /// Rewrite pipeline: reworks an existing caption, optionally re-grounded
    /// on the original image.
    pub async fn rewrite_caption(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, CaptionError> {
        if !matches!(request.payload, Payload::Rewrite { .. }) {
            return Err(CaptionError::Configuration(
                "rewrite_caption requires a rewrite payload".to_string(),
            ));
        }
        self.generate(request).await
    }

    /// Degraded last-resort path, bypassing schema validation entirely.
    pub async fn nsfw_fallback(&self, image_url: &str) -> Result<FallbackCaption, CaptionError> {
        nsfw_caption_fallback(self.client.as_ref(), image_url, self.config.nsfw_threshold).await
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, CaptionError> {
        preflight_promotion(request)?;

        let timer = RequestTimer::start(pipeline_name(&request.payload));
        let result = self.generate_inner(request).await;
        match &result {
            Ok(_) => timer.complete("success", None),
            Err(err) => timer.complete("error", Some(&err.to_string())),
        }
        result
    }

    async fn generate_inner(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, CaptionError> {
        match &request.payload {
            Payload::Image(source) => {
                let image = load_image(source).await?;
                let facts = extract_facts(self.client.as_ref(), &image).await?;
                let selection = self
                    .attempt_loop(request, &Grounding::ImageFacts(&facts))
                    .await?;
                Ok(self.build_result(selection, Some(facts)))
            }
            Payload::Text { theme, context } => {
                let selection = self
                    .attempt_loop(
                        request,
                        &Grounding::Theme {
                            theme: theme.as_str(),
                            context: context.as_str(),
                        },
                    )
                    .await?;
                Ok(self.build_result(selection, None))
            }
            Payload::Rewrite {
                existing_caption,
                image,
            } => {
                // The existing caption is the primary grounding here; a dead
                // image link downgrades to an ungrounded rewrite instead of
                // failing the request.
                let facts = match image {
                    Some(source) => match load_image(source).await {
                        Ok(image) => Some(extract_facts(self.client.as_ref(), &image).await?),
                        Err(err) => {
                            warn!("rewrite proceeding without image grounding: {err}");
                            None
                        }
                    },
                    None => None,
                };
                let grounding = Grounding::Rewrite {
                    existing_caption: existing_caption.as_str(),
                    facts: facts.as_ref(),
                };
                let selection = self.attempt_loop(request, &grounding).await?;
                Ok(self.build_result(selection, facts))
            }
        }
    }

    /// The bounded retry/repair loop. All request parameters stay fixed
    /// across attempts; only the corrective hint derived from the previous
    /// attempt's validation errors is appended.
    async fn attempt_loop(
        &self,
        request: &GenerationRequest,
        grounding: &Grounding<'_>,
    ) -> Result<Selection, CaptionError> {
        let mut hint: Option<String> = None;
        let mut last_errors: Vec<String> = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let prompt = build_generation_prompt(
                request,
                grounding,
                self.config.candidate_count,
                hint.as_deref(),
            );
            let completion =
                CompletionRequest::text(ModelRole::Text, GENERATION_SYSTEM_PROMPT, prompt)
                    .expect_json();

            let raw = match self.client.complete(completion).await {
                Ok(raw) => raw,
                Err(err) if err.consumes_attempt() => {
                    warn!(
                        "attempt {attempt}/{} failed before validation: {err}",
                        self.config.max_attempts
                    );
                    last_errors = vec![err.to_string()];
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let outcome = parse_and_validate(&raw);
            if outcome.is_success() {
                debug!(
                    "attempt {attempt}: {} valid / {} rejected",
                    outcome.valid.len(),
                    outcome.errors.len()
                );
                return Ok(rank(
                    &outcome.valid,
                    request.nsfw,
                    self.config.top_variant_count,
                ));
            }

            warn!(
                "attempt {attempt}/{} produced zero valid candidates: {}",
                self.config.max_attempts,
                truncate_for_log(&outcome.errors.join("; "), 400)
            );
            hint = Some(build_hint(&outcome.errors));
            last_errors = outcome.errors;
        }

        Err(CaptionError::GenerationFailed {
            attempts: self.config.max_attempts,
            errors: last_errors,
        })
    }

    fn build_result(&self, selection: Selection, facts: Option<ImageFacts>) -> GenerationResult {
        GenerationResult {
            final_caption: selection.top_variants[0].clone(),
            top_variants: selection.top_variants,
            ranked: Ranked {
                reason: selection.reason,
            },
            facts,
            provider: self.client.provider_name().to_string(),
        }
    }
}

fn pipeline_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::Image(_) => "generate_from_image",
        Payload::Text { .. } => "generate_from_text",
        Payload::Rewrite { .. } => "rewrite_caption",
    }
}

/// Explicit promotion without a configured creator link is a caller mistake;
/// catching it here keeps it from burning an inference call.
fn preflight_promotion(request: &GenerationRequest) -> Result<(), CaptionError> {
    if request.promotion == PromotionMode::Explicit
        && request
            .creator_link
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        return Err(CaptionError::Configuration(
            "promotion mode 'explicit' requires a creator link".to_string(),
        ));
    }
    Ok(())
}

/// Collapses validation errors into the corrective instruction appended to
/// the next attempt's prompt.
fn build_hint(errors: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for error in errors {
        // One mention per distinct rule is enough for the model.
        let rule = error.split_once(": ").map(|(_, rest)| rest).unwrap_or(error);
        if !seen.contains(&rule) {
            seen.push(rule);
        }
    }
    let summary = seen.join("; ");
    format!(
        "Every candidate was rejected. Fix these problems and return the full JSON again: {}",
        truncate_for_log(&summary, HINT_MAX_CHARS)
    )
}
