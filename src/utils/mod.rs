pub mod http;
pub mod logging;
pub mod timing;

/// Truncates a string for log output without splitting a UTF-8 character.
pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}
