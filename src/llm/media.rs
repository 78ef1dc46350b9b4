use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use tracing::warn;

use crate::error::ImageProcessingError;
use crate::llm::client::InlineImage;
use crate::pipeline::ImageSource;
use crate::utils::http::get_http_client;
use crate::utils::truncate_for_log;

const IMAGE_FETCH_MAX_ATTEMPTS: usize = 3;
const IMAGE_FETCH_BASE_DELAY_MS: u64 = 400;
const IMAGE_FETCH_ERROR_BODY_LIMIT: usize = 800;

/// Sniffs the MIME type from magic bytes, with a HEIC/HEIF brand check that
/// `infer` misses on some encoders.
pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

fn supported_image_mime(mime_type: &str) -> bool {
    matches!(mime_type, "image/jpeg" | "image/png" | "image/webp")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, ImageProcessingError> {
    if let Err(err) = url::Url::parse(url) {
        return Err(ImageProcessingError::Fetch {
            url: url.to_string(),
            detail: format!("invalid URL: {err}"),
        });
    }

    let client = get_http_client();
    let mut last_detail = String::new();

    for attempt in 0..IMAGE_FETCH_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch image {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    IMAGE_FETCH_MAX_ATTEMPTS
                );
                last_detail = err.to_string();
                if !should_retry_error(&err) || attempt + 1 == IMAGE_FETCH_MAX_ATTEMPTS {
                    break;
                }
                let delay = Duration::from_millis(IMAGE_FETCH_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Image fetch failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, IMAGE_FETCH_ERROR_BODY_LIMIT)
            );
            last_detail = format!("status {status}");
            if !should_retry_status(status) || attempt + 1 == IMAGE_FETCH_MAX_ATTEMPTS {
                break;
            }
            let delay = Duration::from_millis(IMAGE_FETCH_BASE_DELAY_MS << attempt);
            tokio::time::sleep(delay).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                last_detail = err.to_string();
                if attempt + 1 == IMAGE_FETCH_MAX_ATTEMPTS {
                    break;
                }
                let delay = Duration::from_millis(IMAGE_FETCH_BASE_DELAY_MS << attempt);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(ImageProcessingError::Fetch {
        url: url.to_string(),
        detail: last_detail,
    })
}

/// Verifies the bytes really are a decodable image of a supported type and
/// wraps them for inline submission to a vision model.
fn verify_image(bytes: Vec<u8>) -> Result<InlineImage, ImageProcessingError> {
    if bytes.is_empty() {
        return Err(ImageProcessingError::Empty);
    }

    let mime_type = detect_mime_type(&bytes)
        .ok_or_else(|| ImageProcessingError::UnsupportedType("unknown".to_string()))?;
    if !supported_image_mime(&mime_type) {
        return Err(ImageProcessingError::UnsupportedType(mime_type));
    }

    image::load_from_memory(&bytes)
        .map_err(|err| ImageProcessingError::Undecodable(err.to_string()))?;

    Ok(InlineImage { bytes, mime_type })
}

/// Resolves an image source (remote URL or inline base64) into verified
/// bytes. Every failure mode maps to an `ImageProcessingError` so callers can
/// route into the text-only or NSFW-tagged fallback.
pub async fn load_image(source: &ImageSource) -> Result<InlineImage, ImageProcessingError> {
    match source {
        ImageSource::Url(url) => {
            let bytes = fetch_bytes(url).await?;
            verify_image(bytes)
        }
        ImageSource::Base64(encoded) => {
            let cleaned = strip_data_url_prefix(encoded);
            let bytes = general_purpose::STANDARD
                .decode(cleaned.trim())
                .map_err(|err| ImageProcessingError::InvalidBase64(err.to_string()))?;
            verify_image(bytes)
        }
    }
}

fn strip_data_url_prefix(encoded: &str) -> &str {
    match encoded.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Smallest decodable 1x1 RGBA PNG, shared by media and pipeline tests.
    pub const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78,
        0x9C, 0x63, 0x60, 0x60, 0x60, 0xF8, 0x0F, 0x00, 0x01, 0x04, 0x01, 0x00, 0x5F, 0xE5,
        0xC3, 0x4B, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];
}
