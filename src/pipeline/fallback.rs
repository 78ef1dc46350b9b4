use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CaptionError;
use crate::llm::client::{CompletionClient, CompletionRequest, InlineImage, ModelRole};
use crate::llm::media::load_image;
use crate::pipeline::ImageSource;

const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a binary content classifier. Answer with a \
single JSON object: {\"label\": \"NSFW\" or \"SFW\", \"score\": confidence between 0 and 1}. \
Return ONLY the raw JSON object.";

const LOOSE_CAPTION_SYSTEM_PROMPT: &str = "Write one short social-media caption for this \
image. Plain text only, no hashtags, no JSON, no quotes around the caption.";

/// Minimal result of the degraded path. Deliberately looser than
/// `CaptionCandidate`: this never goes through the schema validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackCaption {
    pub caption: String,
    pub nsfw: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Classification {
    label: String,
    score: f64,
}

/// Lenient classifier-output parse. A classifier that answers prose is
/// treated as "no NSFW signal" rather than failing the whole degraded path.
fn parse_classification(raw: &str) -> Option<Classification> {
    let trimmed = raw.trim().trim_start_matches("```json").trim_matches('`').trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let label = value.get("label").and_then(|v| v.as_str())?.to_string();
        let score = value.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        return Some(Classification { label, score });
    }
    if trimmed.eq_ignore_ascii_case("nsfw") {
        return Some(Classification {
            label: "NSFW".to_string(),
            score: 1.0,
        });
    }
    None
}

fn should_tag(classification: Option<&Classification>, threshold: f64) -> bool {
    classification
        .is_some_and(|c| c.label.eq_ignore_ascii_case("nsfw") && c.score >= threshold)
}

/// Last-resort captioning for images the primary pipeline could not handle:
/// one classification call, one loose caption call, and an `[NSFW]` prefix
/// when the classifier is confident. Fetch and provider failures surface
/// directly; there is no retry budget here.
pub async fn nsfw_caption_fallback(
    client: &dyn CompletionClient,
    image_url: &str,
    threshold: f64,
) -> Result<FallbackCaption, CaptionError> {
    let image = load_image(&ImageSource::Url(image_url.to_string())).await?;
    caption_degraded(client, image, threshold).await
}

async fn caption_degraded(
    client: &dyn CompletionClient,
    image: InlineImage,
    threshold: f64,
) -> Result<FallbackCaption, CaptionError> {
    let classification = classify(client, &image).await?;
    let tag = should_tag(classification.as_ref(), threshold);
    debug!("fallback classification: {classification:?}, tagging={tag}");

    let caption_request = CompletionRequest::text(
        ModelRole::Fallback,
        LOOSE_CAPTION_SYSTEM_PROMPT,
        "Caption this image.",
    )
    .with_image(image);
    let caption = client.complete(caption_request).await?;
    let caption = caption.trim().to_string();

    Ok(FallbackCaption {
        caption: if tag {
            format!("[NSFW] {caption}")
        } else {
            caption
        },
        nsfw: tag,
    })
}

async fn classify(
    client: &dyn CompletionClient,
    image: &InlineImage,
) -> Result<Option<Classification>, CaptionError> {
    let request = CompletionRequest::text(
        ModelRole::Classifier,
        CLASSIFIER_SYSTEM_PROMPT,
        "Classify this image.",
    )
    .with_image(image.clone())
    .expect_json();

    let raw = client.complete(request).await?;
    let classification = parse_classification(&raw);
    if classification.is_none() {
        warn!("classifier returned unusable output, proceeding untagged: {raw}");
    }
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, InferenceError>>>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, InferenceError> {
            self.responses
                .lock()
                .pop_front()
                .expect("unexpected inference call")
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    fn scripted(responses: Vec<Result<String, InferenceError>>) -> ScriptedClient {
        ScriptedClient {
            responses: Mutex::new(responses.into()),
        }
    }

    fn test_image() -> InlineImage {
        InlineImage {
            bytes: vec![0x89, 0x50, 0x4E, 0x47],
            mime_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn confident_classifier_tags_the_caption() {
        let client = scripted(vec![
            Ok(r#"{"label": "NSFW", "score": 0.92}"#.to_string()),
            Ok("steamy night in".to_string()),
        ]);
        let result = caption_degraded(&client, test_image(), 0.5)
            .await
            .expect("fallback succeeds");
        assert_eq!(result.caption, "[NSFW] steamy night in");
        assert!(result.nsfw);
    }

    #[tokio::test]
    async fn sfw_classification_leaves_caption_untouched() {
        let client = scripted(vec![
            Ok(r#"{"label": "SFW", "score": 0.97}"#.to_string()),
            Ok("sunday coffee run".to_string()),
        ]);
        let result = caption_degraded(&client, test_image(), 0.5)
            .await
            .expect("fallback succeeds");
        assert_eq!(result.caption, "sunday coffee run");
        assert!(!result.nsfw);
    }

    #[tokio::test]
    async fn unusable_classifier_output_proceeds_untagged() {
        let client = scripted(vec![
            Ok("hard to say really".to_string()),
            Ok("caption anyway".to_string()),
        ]);
        let result = caption_degraded(&client, test_image(), 0.5)
            .await
            .expect("fallback succeeds");
        assert_eq!(result.caption, "caption anyway");
        assert!(!result.nsfw);
    }

    #[tokio::test]
    async fn provider_failure_is_terminal() {
        let client = scripted(vec![Err(InferenceError::ModelUnavailable("down".into()))]);
        let err = caption_degraded(&client, test_image(), 0.5)
            .await
            .expect_err("surfaces directly");
        assert!(matches!(
            err,
            CaptionError::Inference(InferenceError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn parses_structured_classifier_output() {
        let c = parse_classification(r#"{"label": "NSFW", "score": 0.93}"#).unwrap();
        assert_eq!(c.label, "NSFW");
        assert!((c.score - 0.93).abs() < f64::EPSILON);
    }

    #[test]
    fn bare_label_counts_as_full_confidence() {
        let c = parse_classification("NSFW").unwrap();
        assert_eq!(c.score, 1.0);
    }

    #[test]
    fn prose_output_yields_no_signal() {
        assert!(parse_classification("this image looks racy to me").is_none());
    }

    #[test]
    fn tagging_requires_label_and_threshold() {
        let nsfw_high = Classification {
            label: "NSFW".into(),
            score: 0.9,
        };
        let nsfw_low = Classification {
            label: "NSFW".into(),
            score: 0.4,
        };
        let sfw_high = Classification {
            label: "SFW".into(),
            score: 0.99,
        };
        assert!(should_tag(Some(&nsfw_high), 0.5));
        assert!(!should_tag(Some(&nsfw_low), 0.5));
        assert!(!should_tag(Some(&sfw_high), 0.5));
        assert!(!should_tag(None, 0.5));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let at_threshold = Classification {
            label: "nsfw".into(),
            score: 0.5,
        };
        assert!(should_tag(Some(&at_threshold), 0.5));
    }
}
