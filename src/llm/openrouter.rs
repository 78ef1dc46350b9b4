use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::error::InferenceError;
use crate::llm::client::{CompletionClient, CompletionRequest, InlineImage, ModelRole};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;
use crate::utils::truncate_for_log;

/// OpenRouter chat-completions client. One instance is shared across
/// requests; it holds no per-request state.
#[derive(Debug, Default)]
pub struct OpenRouterClient;

fn summarize_payload(payload: &Value) -> String {
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let message_count = payload
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|messages| messages.len())
        .unwrap_or(0);
    let json_mode = payload
        .pointer("/response_format/type")
        .and_then(|v| v.as_str())
        .unwrap_or("text");
    format!(
        "model={}, messages={}, response_format={}",
        model, message_count, json_mode
    )
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn error_for_status(status: StatusCode, detail: String) -> InferenceError {
    match status {
        StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => {
            InferenceError::QuotaExceeded(detail)
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            InferenceError::ModelUnavailable(detail)
        }
        _ => InferenceError::Api {
            status: status.as_u16(),
            detail,
        },
    }
}

fn build_message_content(user_prompt: &str, image: Option<&InlineImage>) -> Value {
    let Some(image) = image else {
        return Value::String(user_prompt.to_string());
    };

    let encoded = general_purpose::STANDARD.encode(&image.bytes);
    let data_url = format!("data:{};base64,{}", image.mime_type, encoded);
    json!([
        { "type": "text", "text": user_prompt },
        { "type": "image_url", "image_url": { "url": data_url } }
    ])
}

fn model_for_role(role: ModelRole) -> &'static str {
    match role {
        ModelRole::Text => &CONFIG.text_model,
        ModelRole::Vision => &CONFIG.vision_model,
        ModelRole::Fallback => &CONFIG.fallback_model,
        ModelRole::Classifier => &CONFIG.classifier_model,
    }
}

fn extract_content(response: &Value) -> Result<String, InferenceError> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if content.is_empty() {
        warn!(
            "OpenRouter response had empty content: {}",
            truncate_for_log(&response.to_string(), 2000)
        );
        return Err(InferenceError::EmptyCompletion);
    }
    Ok(content)
}

async fn call_chat_completions(payload: &Value) -> Result<Value, InferenceError> {
    debug!(target: "llm.openrouter", "request: {}", summarize_payload(payload));

    let client = get_http_client();
    let response = client
        .post(format!(
            "{}/chat/completions",
            CONFIG.openrouter_base_url.trim_end_matches('/')
        ))
        .header(
            "Authorization",
            format!("Bearer {}", CONFIG.openrouter_api_key),
        )
        .header("X-Title", "capgen")
        .timeout(Duration::from_secs(CONFIG.request_timeout_seconds))
        .json(payload)
        .send()
        .await
        .map_err(|err| {
            if err.is_timeout() {
                InferenceError::Timeout
            } else {
                InferenceError::Network(err.to_string())
            }
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        warn!(
            "OpenRouter API error: status={}, body={}",
            status, body_summary
        );
        let detail = message.unwrap_or(body_summary);
        return Err(error_for_status(status, detail));
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| InferenceError::Network(err.to_string()))
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        let model = model_for_role(request.role);
        let content = build_message_content(&request.user_prompt, request.image.as_ref());

        let mut payload = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": content },
            ],
            "temperature": CONFIG.temperature,
            "top_p": CONFIG.top_p,
            "max_tokens": CONFIG.max_output_tokens,
        });
        if request.json {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        let operation = match request.role {
            ModelRole::Text => "generate_text",
            ModelRole::Vision => "generate_vision",
            ModelRole::Fallback => "generate_fallback",
            ModelRole::Classifier => "classify",
        };

        log_llm_timing("openrouter", model, operation, None, || async {
            let response = call_chat_completions(&payload).await?;
            extract_content(&response)
        })
        .await
    }

    fn provider_name(&self) -> &str {
        "openrouter"
    }
}
