use crate::pipeline::facts::ImageFacts;
use crate::pipeline::voice::voice_guide_block;
use crate::pipeline::{GenerationRequest, PromotionMode};

/// System prompt shared by all three generation pipelines. The JSON contract
/// mirrors `CaptionCandidate` exactly; parse+validate enforces it afterwards.
pub const GENERATION_SYSTEM_PROMPT: &str = r#"You are a caption writer for social-media creators.
Write captions that sound like a real person, grounded ONLY in the material provided.

You must output a single valid JSON object of the form:
{"candidates": [ ... ]}
Each element of "candidates" is an object with exactly these fields:
  "caption": string, the post text (non-empty)
  "alt": string, an accessibility description of the image or concept (non-empty, must NOT repeat the caption)
  "hashtags": array of strings, each matching #[A-Za-z0-9]+, no duplicates
  "cta": string, a call to action consistent with the promotion policy below
  "mood": string
  "style": string
  "safety_level": one of "normal", "spicy_safe", "unsafe"
  "nsfw": boolean
  "titles": optional array of strings, only when the platform section asks for titles

Return ONLY the raw JSON object. No markdown fences, no commentary."#;

/// System prompt for the fact-extraction vision call. Tone-neutral by design:
/// facts describe what is in the image, the generation pass decides how to
/// write about it.
pub const FACTS_SYSTEM_PROMPT: &str = "You are an image analyst. Describe only what is \
visibly present in the image as a single flat JSON object: keys such as \"objects\", \
\"setting\", \"colors\", \"lighting\", \"mood_cues\", with short string or string-array \
values. No opinions, no caption suggestions, no tone. Return ONLY the raw JSON object.";

fn section(title: &str, body: &str) -> String {
    format!("{title}\n{body}\n")
}

fn platform_section(request: &GenerationRequest) -> String {
    let mut body = format!("Write for {}.", request.platform.as_str());
    match request.platform {
        crate::pipeline::Platform::Instagram => {
            body.push_str(" Caption up to ~2200 chars, line breaks welcome, hashtags carry reach.")
        }
        crate::pipeline::Platform::X => {
            body.push_str(" Hard 280-char limit including hashtags. Punchy over pretty.")
        }
        crate::pipeline::Platform::Tiktok => {
            body.push_str(" Short hook-first caption; the first five words decide the scroll.")
        }
        crate::pipeline::Platform::Reddit => body.push_str(
            " Provide 2-3 post title options in the \"titles\" field; titles read as plain \
             sentences, never clickbait formulas.",
        ),
    }
    section("PLATFORM:", &body)
}

fn promotion_section(request: &GenerationRequest) -> String {
    let body = match request.promotion {
        PromotionMode::None => {
            "Promotion is OFF. The cta must not reference external profiles, links, \
             subscriptions, or paid pages of any kind."
                .to_string()
        }
        PromotionMode::Subtle => {
            "Promotion is SUBTLE. A soft cta may hint at more content elsewhere, but no \
             explicit platform names or links."
                .to_string()
        }
        PromotionMode::Explicit => {
            // Preflight guarantees the link exists before any prompt is built.
            let link = request.creator_link.as_deref().unwrap_or_default();
            format!(
                "Promotion is EXPLICIT. The cta of every candidate must include this link \
                 verbatim: {link}"
            )
        }
    };
    section("PROMOTION POLICY:", &body)
}

fn nsfw_section(request: &GenerationRequest) -> String {
    let body = if request.nsfw {
        "Adult content is allowed. Set \"nsfw\" and \"safety_level\" honestly per candidate."
    } else {
        "Keep every candidate safe-for-work: safety_level \"normal\" or \"spicy_safe\", \
         \"nsfw\" false, no explicit vocabulary."
    };
    section("CONTENT RATING:", body)
}

/// Payload-specific grounding for the three pipelines.
#[derive(Debug, Clone)]
pub enum Grounding<'a> {
    ImageFacts(&'a ImageFacts),
    Theme { theme: &'a str, context: &'a str },
    Rewrite {
        existing_caption: &'a str,
        facts: Option<&'a ImageFacts>,
    },
}

fn grounding_section(grounding: &Grounding<'_>) -> String {
    match grounding {
        Grounding::ImageFacts(facts) => section(
            "IMAGE FACTS (the only source of truth about the image):",
            &facts.to_json_string(),
        ),
        Grounding::Theme { theme, context } => {
            let mut body = format!("Theme: {theme}");
            if !context.trim().is_empty() {
                body.push_str(&format!("\nAdditional context: {context}"));
            }
            section("THEME:", &body)
        }
        Grounding::Rewrite {
            existing_caption,
            facts,
        } => {
            let mut body = format!(
                "Rewrite this caption while keeping its factual claims intact:\n{existing_caption}"
            );
            if let Some(facts) = facts {
                body.push_str("\nImage facts for reference:\n");
                body.push_str(&facts.to_json_string());
            }
            section("REWRITE SOURCE:", &body)
        }
    }
}

/// Assembles the full user prompt for one generation attempt. Deterministic
/// in its inputs; across retries everything except `hint` is byte-identical.
pub fn build_generation_prompt(
    request: &GenerationRequest,
    grounding: &Grounding<'_>,
    candidate_count: usize,
    hint: Option<&str>,
) -> String {
    let mut sections = vec![platform_section(request)];

    if let Some(guide) = voice_guide_block(&request.voice) {
        sections.push(section("VOICE:", guide));
    }

    sections.push(section(
        "STYLE AND MOOD:",
        &format!("Style: {}. Mood: {}.", request.style, request.mood),
    ));
    sections.push(grounding_section(grounding));
    sections.push(nsfw_section(request));
    sections.push(promotion_section(request));

    let hashtag_note = if request.include_hashtags {
        "Give each candidate 3-8 hashtags."
    } else {
        "Set \"hashtags\" to an empty array for every candidate."
    };
    sections.push(section(
        "TASK:",
        &format!(
            "Produce exactly {candidate_count} distinct candidates in the required JSON shape. \
             {hashtag_note}"
        ),
    ));

    if let Some(hint) = hint {
        sections.push(section(
            "CORRECTIONS (your previous answer was rejected):",
            hint,
        ));
    }

    sections.join("\n")
}
