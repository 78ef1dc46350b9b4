use std::env;

use once_cell::sync::Lazy;

/// Knobs the caption engine consults on every request. Kept separate from the
/// provider config so tests can construct one directly instead of going
/// through the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on generation attempts per request (including the first).
    pub max_attempts: usize,
    /// How many candidate objects each attempt asks the model for.
    pub candidate_count: usize,
    /// How many ranked variants the result carries.
    pub top_variant_count: usize,
    /// Classifier score at or above which the degraded path tags `[NSFW]`.
    pub nsfw_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_attempts: 3,
            candidate_count: 5,
            top_variant_count: 2,
            nsfw_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub fallback_model: String,
    pub classifier_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: i32,
    pub request_timeout_seconds: u64,
    pub max_attempts: usize,
    pub candidate_count: usize,
    pub top_variant_count: usize,
    pub nsfw_threshold: f64,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

impl Config {
    fn load() -> Self {
        Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            openrouter_api_key: env_string("OPENROUTER_API_KEY", ""),
            openrouter_base_url: env_string("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            text_model: env_string("CAPGEN_TEXT_MODEL", "anthropic/claude-sonnet-4"),
            vision_model: env_string("CAPGEN_VISION_MODEL", "openai/gpt-4o"),
            fallback_model: env_string(
                "CAPGEN_FALLBACK_MODEL",
                "meta-llama/llama-3.2-11b-vision-instruct",
            ),
            classifier_model: env_string(
                "CAPGEN_CLASSIFIER_MODEL",
                "meta-llama/llama-3.2-11b-vision-instruct",
            ),
            temperature: env_f32("CAPGEN_TEMPERATURE", 0.8),
            top_p: env_f32("CAPGEN_TOP_P", 0.95),
            max_output_tokens: env_i32("CAPGEN_MAX_OUTPUT_TOKENS", 2048),
            request_timeout_seconds: env_u64("CAPGEN_REQUEST_TIMEOUT_SECONDS", 30),
            max_attempts: env_usize("CAPGEN_MAX_ATTEMPTS", 3).max(1),
            candidate_count: env_usize("CAPGEN_CANDIDATE_COUNT", 5).max(1),
            top_variant_count: env_usize("CAPGEN_TOP_VARIANTS", 2).max(1),
            nsfw_threshold: env_f64("CAPGEN_NSFW_THRESHOLD", 0.5).clamp(0.0, 1.0),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_attempts: self.max_attempts,
            candidate_count: self.candidate_count,
            top_variant_count: self.top_variant_count,
            nsfw_threshold: self.nsfw_threshold,
        }
    }
}
