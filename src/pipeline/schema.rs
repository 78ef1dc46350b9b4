use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[A-Za-z0-9]+$").expect("valid hashtag regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Normal,
    SpicySafe,
    Unsafe,
}

/// One generated caption object. The shape the model is asked to emit; a
/// candidate only reaches the ranker after passing `parse_and_validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCandidate {
    pub caption: String,
    pub alt: String,
    pub hashtags: Vec<String>,
    pub cta: String,
    pub mood: String,
    pub style: String,
    pub safety_level: SafetyLevel,
    pub nsfw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub titles: Option<Vec<String>>,
}

/// Discriminated parse+validate result. Malformed model output is data here,
/// not an exception; the retry controller reads `errors` to build its hint.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<CaptionCandidate>,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    /// An attempt succeeds iff at least one candidate survived validation.
    pub fn is_success(&self) -> bool {
        !self.valid.is_empty()
    }
}

/// Models wrap JSON in markdown fences often enough that stripping them here
/// is cheaper than a retry.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Pulls the candidate array out of whatever shape the model answered with:
/// a bare array, or an object wrapping one under a known key (JSON-object
/// response mode forces the latter), or a single candidate object.
fn candidate_array(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["candidates", "variants", "captions"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Ok(vec![Value::Object(map)])
        }
        other => Err(format!(
            "response must be a JSON array of candidate objects, got {}",
            type_name(&other)
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_rules(candidate: &CaptionCandidate) -> Result<(), String> {
    let caption = candidate.caption.trim();
    let alt = candidate.alt.trim();

    if caption.is_empty() {
        return Err("caption must be non-empty".to_string());
    }
    if alt.is_empty() {
        return Err("alt must be non-empty".to_string());
    }
    if caption == alt {
        return Err("alt must differ from caption".to_string());
    }

    let mut seen = Vec::with_capacity(candidate.hashtags.len());
    for tag in &candidate.hashtags {
        if !HASHTAG_RE.is_match(tag) {
            return Err(format!("hashtag '{tag}' must match #[A-Za-z0-9]+"));
        }
        let lowered = tag.to_lowercase();
        if seen.contains(&lowered) {
            return Err(format!("duplicate hashtag '{tag}' (case-insensitive)"));
        }
        seen.push(lowered);
    }

    // Title eligibility is prompt-gated by platform; the validator stays
    // platform-agnostic and only rejects blank entries.
    if let Some(titles) = &candidate.titles {
        if titles.iter().any(|title| title.trim().is_empty()) {
            return Err("titles must not contain empty entries".to_string());
        }
    }

    Ok(())
}

/// Parses raw model output and validates every element independently. A mixed
/// array yields a partial `valid` list plus per-candidate errors; a JSON parse
/// failure yields an outcome with a single error, never a panic or a thrown
/// error past this layer.
pub fn parse_and_validate(raw: &str) -> ValidationOutcome {
    let cleaned = strip_code_fences(raw);

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(err) => {
            return ValidationOutcome {
                valid: Vec::new(),
                errors: vec![format!("response was not valid JSON: {err}")],
            }
        }
    };

    let elements = match candidate_array(value) {
        Ok(elements) => elements,
        Err(err) => {
            return ValidationOutcome {
                valid: Vec::new(),
                errors: vec![err],
            }
        }
    };

    if elements.is_empty() {
        return ValidationOutcome {
            valid: Vec::new(),
            errors: vec!["response contained zero candidates".to_string()],
        };
    }

    let mut outcome = ValidationOutcome::default();
    for (index, element) in elements.into_iter().enumerate() {
        let label = index + 1;
        match serde_json::from_value::<CaptionCandidate>(element) {
            Ok(candidate) => match check_rules(&candidate) {
                Ok(()) => outcome.valid.push(candidate),
                Err(err) => outcome.errors.push(format!("candidate {label}: {err}")),
            },
            Err(err) => outcome
                .errors
                .push(format!("candidate {label}: schema mismatch: {err}")),
        }
    }
    outcome
}
