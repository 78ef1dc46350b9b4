use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::InferenceError;
use crate::llm::client::{CompletionClient, CompletionRequest, InlineImage, ModelRole};
use crate::pipeline::prompt::FACTS_SYSTEM_PROMPT;

/// Neutral structured description of image contents. Extracted once per
/// request and reused across retry attempts, never re-derived mid-loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageFacts(pub Map<String, Value>);

impl ImageFacts {
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// A facts model that answers prose instead of JSON still gave us grounding;
/// wrap the text rather than failing the whole request.
pub(crate) fn facts_from_response(raw: &str) -> ImageFacts {
    let cleaned = strip_fences(raw);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => ImageFacts(map),
        _ => {
            debug!("facts response was not a JSON object; wrapping as description");
            let mut map = Map::new();
            map.insert(
                "description".to_string(),
                Value::String(cleaned.to_string()),
            );
            ImageFacts(map)
        }
    }
}

/// Runs the single fact-extraction vision call for a request. Image loading
/// happens before this point; failures here are provider failures, not
/// `ImageProcessingError`s.
pub async fn extract_facts(
    client: &dyn CompletionClient,
    image: &InlineImage,
) -> Result<ImageFacts, InferenceError> {
    let request = CompletionRequest::text(
        ModelRole::Vision,
        FACTS_SYSTEM_PROMPT,
        "Describe this image as the flat JSON object specified.",
    )
    .with_image(image.clone())
    .expect_json();

    let raw = client.complete(request).await?;
    Ok(facts_from_response(&raw))
}
