use std::sync::Arc;

use anyhow::anyhow;
use base64::{engine::general_purpose, Engine as _};
use dotenvy::dotenv;
use tracing::{error, info, warn};

mod config;
mod error;
mod llm;
mod pipeline;
mod utils;

use config::CONFIG;
use error::CaptionError;
use llm::OpenRouterClient;
use pipeline::voice::{known_voices, voice_guide_block};
use pipeline::{
    CaptionEngine, GenerationRequest, ImageSource, Payload, Platform, PromotionMode,
};
use utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage:\n  capgen image (--url <url> | --file <path>) [--theme <fallback-theme>] [common flags]\n  capgen text --theme <theme> [--context <context>] [common flags]\n  capgen rewrite --caption <caption> [--url <url>] [common flags]\n  capgen nsfw-check --url <url>\n\nCommon flags:\n  --platform instagram|x|tiktok|reddit (default instagram)\n  --voice <voice-id>\n  --style <style>  --mood <mood>\n  --nsfw\n  --promotion none|subtle|explicit  --creator-link <url>\n  --no-hashtags"
}

#[derive(Debug)]
enum CliCommand {
    Image {
        source: ImageSource,
        fallback_theme: Option<String>,
        request: GenerationRequest,
    },
    Text {
        request: GenerationRequest,
    },
    Rewrite {
        request: GenerationRequest,
    },
    NsfwCheck {
        url: String,
    },
}

fn take_value(args: &[String], index: &mut usize, flag: &str) -> anyhow::Result<String> {
    *index += 1;
    args.get(*index)
        .cloned()
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

#[derive(Debug, Default)]
struct CommonFlags {
    platform: Option<Platform>,
    voice: Option<String>,
    style: Option<String>,
    mood: Option<String>,
    nsfw: bool,
    promotion: Option<PromotionMode>,
    creator_link: Option<String>,
    no_hashtags: bool,
}

impl CommonFlags {
    fn apply(self, payload: Payload) -> GenerationRequest {
        let mut request =
            GenerationRequest::new(self.platform.unwrap_or(Platform::Instagram), payload);
        if let Some(voice) = self.voice {
            if voice_guide_block(&voice).is_none() {
                warn!(
                    "unknown voice '{}'; voice guidance will be omitted. Known voices: {}",
                    voice,
                    known_voices().collect::<Vec<_>>().join(", ")
                );
            }
            request.voice = voice;
        }
        if let Some(style) = self.style {
            request.style = style;
        }
        if let Some(mood) = self.mood {
            request.mood = mood;
        }
        request.nsfw = self.nsfw;
        request.promotion = self.promotion.unwrap_or_default();
        request.creator_link = self.creator_link;
        request.include_hashtags = !self.no_hashtags;
        request
    }
}

struct ParsedFlags {
    common: CommonFlags,
    url: Option<String>,
    file: Option<String>,
    theme: Option<String>,
    context: Option<String>,
    caption: Option<String>,
}

fn parse_flags(args: &[String], start: usize) -> anyhow::Result<ParsedFlags> {
    let mut parsed = ParsedFlags {
        common: CommonFlags::default(),
        url: None,
        file: None,
        theme: None,
        context: None,
        caption: None,
    };

    let mut index = start;
    while index < args.len() {
        match args[index].as_str() {
            "--url" => parsed.url = Some(take_value(args, &mut index, "--url")?),
            "--file" => parsed.file = Some(take_value(args, &mut index, "--file")?),
            "--theme" => parsed.theme = Some(take_value(args, &mut index, "--theme")?),
            "--context" => parsed.context = Some(take_value(args, &mut index, "--context")?),
            "--caption" => parsed.caption = Some(take_value(args, &mut index, "--caption")?),
            "--platform" => {
                let value = take_value(args, &mut index, "--platform")?;
                parsed.common.platform = Some(
                    Platform::parse(&value).ok_or_else(|| anyhow!("Unknown platform: {value}"))?,
                );
            }
            "--voice" => parsed.common.voice = Some(take_value(args, &mut index, "--voice")?),
            "--style" => parsed.common.style = Some(take_value(args, &mut index, "--style")?),
            "--mood" => parsed.common.mood = Some(take_value(args, &mut index, "--mood")?),
            "--nsfw" => parsed.common.nsfw = true,
            "--promotion" => {
                let value = take_value(args, &mut index, "--promotion")?;
                parsed.common.promotion = Some(
                    PromotionMode::parse(&value)
                        .ok_or_else(|| anyhow!("Unknown promotion mode: {value}"))?,
                );
            }
            "--creator-link" => {
                parsed.common.creator_link = Some(take_value(args, &mut index, "--creator-link")?)
            }
            "--no-hashtags" => parsed.common.no_hashtags = true,
            "--help" | "-h" => return Err(anyhow!(usage())),
            other => return Err(anyhow!("Unknown argument: {other}\n{}", usage())),
        }
        index += 1;
    }
    Ok(parsed)
}

fn parse_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let subcommand = args
        .get(1)
        .map(|value| value.as_str())
        .ok_or_else(|| anyhow!(usage()))?;
    let flags = parse_flags(args, 2)?;

    match subcommand {
        "image" => {
            let source = match (&flags.url, &flags.file) {
                (Some(url), None) => ImageSource::Url(url.clone()),
                (None, Some(path)) => {
                    let bytes = std::fs::read(path)
                        .map_err(|err| anyhow!("Failed to read {path}: {err}"))?;
                    ImageSource::Base64(general_purpose::STANDARD.encode(bytes))
                }
                _ => return Err(anyhow!("image requires exactly one of --url or --file")),
            };
            let request = flags.common.apply(Payload::Image(source.clone()));
            Ok(CliCommand::Image {
                source,
                fallback_theme: flags.theme,
                request,
            })
        }
        "text" => {
            let theme = flags.theme.ok_or_else(|| anyhow!("text requires --theme"))?;
            let request = flags.common.apply(Payload::Text {
                theme,
                context: flags.context.unwrap_or_default(),
            });
            Ok(CliCommand::Text { request })
        }
        "rewrite" => {
            let caption = flags
                .caption
                .ok_or_else(|| anyhow!("rewrite requires --caption"))?;
            let request = flags.common.apply(Payload::Rewrite {
                existing_caption: caption,
                image: flags.url.map(ImageSource::Url),
            });
            Ok(CliCommand::Rewrite { request })
        }
        "nsfw-check" => {
            let url = flags
                .url
                .ok_or_else(|| anyhow!("nsfw-check requires --url"))?;
            Ok(CliCommand::NsfwCheck { url })
        }
        other => Err(anyhow!("Unknown subcommand: {other}\n{}", usage())),
    }
}

/// Maps engine failures to distinct operator-facing messages, preserving the
/// taxonomy so the exit text tells the user what to actually do.
fn describe_failure(err: &CaptionError) -> String {
    match err {
        CaptionError::GenerationFailed { attempts, .. } => format!(
            "the model could not produce a valid caption in {attempts} attempts; try again or loosen the constraints"
        ),
        CaptionError::ImageProcessing(inner) => {
            format!("the image could not be processed ({inner}); try a different image or a text theme")
        }
        CaptionError::Inference(inner) if !inner.consumes_attempt() => {
            format!("the provider is unavailable ({inner}); wait before retrying or check your plan")
        }
        CaptionError::Inference(inner) => format!("network failure talking to the provider: {inner}"),
        CaptionError::Configuration(detail) => format!("bad request configuration: {detail}"),
    }
}

#[derive(Debug, PartialEq)]
enum ImageFallbackPlan {
    ResubmitAsText { theme: String },
    DegradedNsfw { url: String },
    Propagate,
}

/// Routing decision for an image pipeline failure: a fallback theme always
/// wins, the degraded NSFW path needs a re-fetchable URL, anything else
/// propagates the original error.
fn image_failure_plan(
    fallback_theme: Option<String>,
    nsfw: bool,
    source: &ImageSource,
) -> ImageFallbackPlan {
    if let Some(theme) = fallback_theme {
        return ImageFallbackPlan::ResubmitAsText { theme };
    }
    if nsfw {
        if let ImageSource::Url(url) = source {
            return ImageFallbackPlan::DegradedNsfw { url: url.clone() };
        }
    }
    ImageFallbackPlan::Propagate
}

/// Image pipeline with the caller-level fallback contract: an
/// ImageProcessingError redirects into a text-theme resubmission when a
/// fallback theme is available, or the NSFW-tagged degraded path for nsfw
/// requests with a fetchable URL.
async fn run_image_command(
    engine: &CaptionEngine,
    source: ImageSource,
    fallback_theme: Option<String>,
    request: GenerationRequest,
) -> anyhow::Result<serde_json::Value> {
    match engine.generate_from_image(&request).await {
        Ok(result) => Ok(serde_json::to_value(result)?),
        Err(CaptionError::ImageProcessing(err)) => {
            warn!("image pipeline failed: {err}");
            match image_failure_plan(fallback_theme, request.nsfw, &source) {
                ImageFallbackPlan::ResubmitAsText { theme } => {
                    info!("resubmitting as a text-theme request");
                    let mut text_request = request.clone();
                    text_request.payload = Payload::Text {
                        theme,
                        context: String::new(),
                    };
                    let result = engine.generate_from_text(&text_request).await?;
                    Ok(serde_json::to_value(result)?)
                }
                ImageFallbackPlan::DegradedNsfw { url } => {
                    info!("falling back to degraded NSFW captioning");
                    let result = engine.nsfw_fallback(&url).await?;
                    Ok(serde_json::to_value(result)?)
                }
                ImageFallbackPlan::Propagate => Err(CaptionError::ImageProcessing(err).into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    if CONFIG.openrouter_api_key.trim().is_empty() {
        return Err(anyhow!("OPENROUTER_API_KEY is required"));
    }

    let engine = CaptionEngine::new(Arc::new(OpenRouterClient), CONFIG.engine());

    let output = match command {
        CliCommand::Image {
            source,
            fallback_theme,
            request,
        } => run_image_command(&engine, source, fallback_theme, request).await,
        CliCommand::Text { request } => engine
            .generate_from_text(&request)
            .await
            .map_err(Into::into)
            .and_then(|result| serde_json::to_value(result).map_err(Into::into)),
        CliCommand::Rewrite { request } => engine
            .rewrite_caption(&request)
            .await
            .map_err(Into::into)
            .and_then(|result| serde_json::to_value(result).map_err(Into::into)),
        CliCommand::NsfwCheck { url } => engine
            .nsfw_fallback(&url)
            .await
            .map_err(Into::into)
            .and_then(|result| serde_json::to_value(result).map_err(Into::into)),
    };

    match output {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            if let Some(caption_err) = err.downcast_ref::<CaptionError>() {
                error!("{}", describe_failure(caption_err));
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::InferenceError;
    use crate::llm::client::{CompletionClient, CompletionRequest};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, InferenceError>>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
            self.prompts.lock().push(request.user_prompt);
            self.responses
                .lock()
                .pop_front()
                .expect("unexpected inference call")
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    fn scripted_engine(
        responses: Vec<Result<String, InferenceError>>,
    ) -> (Arc<ScriptedClient>, CaptionEngine) {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        });
        let engine = CaptionEngine::new(client.clone(), EngineConfig::default());
        (client, engine)
    }

    fn valid_batch() -> String {
        json!([{
            "caption": "rainy day thoughts",
            "alt": "a window covered in raindrops",
            "hashtags": ["#rain", "#cozy", "#home"],
            "cta": "tell me below",
            "mood": "engaging",
            "style": "authentic",
            "safety_level": "normal",
            "nsfw": false
        }])
        .to_string()
    }

    fn undecodable_source() -> ImageSource {
        ImageSource::Base64(general_purpose::STANDARD.encode(b"not an image"))
    }

    fn args(parts: &[&str]) -> Vec<String> {
        std::iter::once("capgen")
            .chain(parts.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_a_text_command_with_common_flags() {
        let command = parse_args(&args(&[
            "text",
            "--theme",
            "rainy day",
            "--platform",
            "reddit",
            "--voice",
            "edgy_baddie",
            "--no-hashtags",
        ]))
        .expect("parses");
        match command {
            CliCommand::Text { request } => {
                assert_eq!(request.platform, Platform::Reddit);
                assert_eq!(request.voice, "edgy_baddie");
                assert!(!request.include_hashtags);
            }
            other => panic!("expected text command, got {other:?}"),
        }
    }

    #[test]
    fn image_requires_exactly_one_source() {
        assert!(parse_args(&args(&["image"])).is_err());
        assert!(parse_args(&args(&[
            "image", "--url", "https://x/y.jpg", "--file", "a.png"
        ]))
        .is_err());
    }

    #[test]
    fn rejects_unknown_promotion_mode() {
        let err = parse_args(&args(&[
            "text", "--theme", "t", "--promotion", "aggressive"
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown promotion mode"));
    }

    #[tokio::test]
    async fn image_failure_with_a_theme_resubmits_as_text() {
        let (client, engine) = scripted_engine(vec![Ok(valid_batch())]);
        let source = undecodable_source();
        let request = CommonFlags::default().apply(Payload::Image(source.clone()));

        let value = run_image_command(&engine, source, Some("rainy day".to_string()), request)
            .await
            .expect("text resubmission succeeds");

        assert_eq!(value["final"]["caption"], "rainy day thoughts");
        let prompts = client.prompts.lock();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("rainy day"));
    }

    #[tokio::test]
    async fn image_failure_without_fallback_propagates_the_error() {
        let (client, engine) = scripted_engine(vec![]);
        let source = undecodable_source();
        let request = CommonFlags::default().apply(Payload::Image(source.clone()));

        let err = run_image_command(&engine, source, None, request)
            .await
            .expect_err("no fallback available");
        assert!(matches!(
            err.downcast_ref::<CaptionError>(),
            Some(CaptionError::ImageProcessing(_))
        ));
        assert!(client.prompts.lock().is_empty());
    }

    #[test]
    fn fallback_routing_prefers_theme_then_degraded_nsfw() {
        let url = ImageSource::Url("https://example.com/pic.jpg".to_string());
        let inline = ImageSource::Base64("aGk=".to_string());

        assert_eq!(
            image_failure_plan(Some("beach".into()), true, &url),
            ImageFallbackPlan::ResubmitAsText {
                theme: "beach".into()
            }
        );
        assert_eq!(
            image_failure_plan(None, true, &url),
            ImageFallbackPlan::DegradedNsfw {
                url: "https://example.com/pic.jpg".into()
            }
        );
        assert_eq!(
            image_failure_plan(None, true, &inline),
            ImageFallbackPlan::Propagate
        );
        assert_eq!(
            image_failure_plan(None, false, &url),
            ImageFallbackPlan::Propagate
        );
    }

    #[test]
    fn rewrite_keeps_optional_image_url() {
        let command = parse_args(&args(&[
            "rewrite",
            "--caption",
            "old caption",
            "--url",
            "https://example.com/pic.jpg",
        ]))
        .expect("parses");
        match command {
            CliCommand::Rewrite { request } => match request.payload {
                Payload::Rewrite { image, .. } => {
                    assert!(matches!(image, Some(ImageSource::Url(_))))
                }
                other => panic!("expected rewrite payload, got {other:?}"),
            },
            other => panic!("expected rewrite command, got {other:?}"),
        }
    }
}
