pub mod facts;
pub mod fallback;
pub mod generate;
pub mod prompt;
pub mod rank;
pub mod schema;
pub mod voice;

use serde::{Deserialize, Serialize};

pub use facts::ImageFacts;
pub use generate::CaptionEngine;
pub use schema::CaptionCandidate;

/// Target platform for the generated caption. Controls length, register and
/// hashtag guidance in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    X,
    Tiktok,
    Reddit,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Platform> {
        match value.trim().to_lowercase().as_str() {
            "instagram" => Some(Platform::Instagram),
            "x" | "twitter" => Some(Platform::X),
            "tiktok" => Some(Platform::Tiktok),
            "reddit" => Some(Platform::Reddit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::X => "x",
            Platform::Tiktok => "tiktok",
            Platform::Reddit => "reddit",
        }
    }
}

/// Whether and how promotional calls-to-action may appear in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionMode {
    #[default]
    None,
    Subtle,
    Explicit,
}

impl PromotionMode {
    pub fn parse(value: &str) -> Option<PromotionMode> {
        match value.trim().to_lowercase().as_str() {
            "none" => Some(PromotionMode::None),
            "subtle" => Some(PromotionMode::Subtle),
            "explicit" => Some(PromotionMode::Explicit),
            _ => None,
        }
    }
}

/// Where the image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Base64(String),
}

/// Pipeline-specific grounding payload. Exactly one mode per request by
/// construction.
#[derive(Debug, Clone)]
pub enum Payload {
    Image(ImageSource),
    Text { theme: String, context: String },
    Rewrite {
        existing_caption: String,
        image: Option<ImageSource>,
    },
}

/// Immutable input to one generation request. Style, mood and voice are kept
/// unchanged across retry attempts; only the corrective hint varies.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub platform: Platform,
    pub voice: String,
    pub style: String,
    pub mood: String,
    pub nsfw: bool,
    pub promotion: PromotionMode,
    pub include_hashtags: bool,
    /// Creator's external promotional URL, required when `promotion` is
    /// `Explicit`. Supplied by the profile store, not read from config.
    pub creator_link: Option<String>,
    pub payload: Payload,
}

impl GenerationRequest {
    pub fn new(platform: Platform, payload: Payload) -> Self {
        GenerationRequest {
            platform,
            voice: String::new(),
            style: "authentic".to_string(),
            mood: "engaging".to_string(),
            nsfw: false,
            promotion: PromotionMode::None,
            include_hashtags: true,
            creator_link: None,
            payload,
        }
    }
}

/// Ranking explanation attached to the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranked {
    pub reason: String,
}

/// Final output of a generation request. Candidates never outlive the request
/// on this side; persistence belongs to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    #[serde(rename = "final")]
    pub final_caption: CaptionCandidate,
    #[serde(rename = "topVariants")]
    pub top_variants: Vec<CaptionCandidate>,
    pub ranked: Ranked,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<ImageFacts>,
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parsing_accepts_aliases() {
        assert_eq!(Platform::parse("Twitter"), Some(Platform::X));
        assert_eq!(Platform::parse(" reddit "), Some(Platform::Reddit));
        assert_eq!(Platform::parse("myspace"), None);
    }

    #[test]
    fn promotion_mode_parsing() {
        assert_eq!(PromotionMode::parse("EXPLICIT"), Some(PromotionMode::Explicit));
        assert_eq!(PromotionMode::parse("off"), None);
    }
}
