use thiserror::Error;

/// Failures raised while turning a URL or base64 payload into usable image
/// bytes. The image pipeline treats these as terminal; callers are expected
/// to redirect into a text-only or NSFW-tagged fallback instead of surfacing
/// a generic error.
#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("failed to fetch image from {url}: {detail}")]
    Fetch { url: String, detail: String },
    #[error("invalid base64 image payload: {0}")]
    InvalidBase64(String),
    #[error("unsupported image content type: {0}")]
    UnsupportedType(String),
    #[error("image bytes could not be decoded: {0}")]
    Undecodable(String),
    #[error("image payload is empty")]
    Empty,
}

/// Failures from the inference provider itself. Quota and outage conditions
/// are deliberately distinct from transport errors: retrying them inside the
/// attempt loop would not help, so the engine aborts on them immediately.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("network error calling model: {0}")]
    Network(String),
    #[error("inference call timed out")]
    Timeout,
    #[error("provider returned status {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("provider returned an empty completion")]
    EmptyCompletion,
}

impl InferenceError {
    /// True when the failure is transient at the transport level and may be
    /// charged against the bounded retry budget rather than aborting the
    /// whole request.
    pub fn consumes_attempt(&self) -> bool {
        matches!(
            self,
            InferenceError::Network(_)
                | InferenceError::Timeout
                | InferenceError::Api { .. }
                | InferenceError::EmptyCompletion
        )
    }
}

/// Top-level error surface of the caption engine.
#[derive(Debug, Error)]
pub enum CaptionError {
    /// Retry budget exhausted with zero valid candidates. Carries the last
    /// attempt's validation errors so the caller can decide fallback policy.
    #[error("caption generation failed after {attempts} attempt(s): {}", .errors.join("; "))]
    GenerationFailed {
        attempts: usize,
        errors: Vec<String>,
    },
    #[error(transparent)]
    ImageProcessing(#[from] ImageProcessingError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_do_not_consume_retry_budget() {
        assert!(!InferenceError::QuotaExceeded("402".into()).consumes_attempt());
        assert!(!InferenceError::ModelUnavailable("503".into()).consumes_attempt());
        assert!(InferenceError::Timeout.consumes_attempt());
        assert!(InferenceError::Network("reset".into()).consumes_attempt());
    }

    #[test]
    fn generation_failed_message_lists_errors() {
        let err = CaptionError::GenerationFailed {
            attempts: 3,
            errors: vec!["alt must differ from caption".into()],
        };
        let text = err.to_string();
        assert!(text.contains("3 attempt(s)"));
        assert!(text.contains("alt must differ"));
    }
}
