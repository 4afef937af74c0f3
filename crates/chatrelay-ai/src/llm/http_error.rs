use reqwest::Response;
use serde_json::Value;

use crate::error::AiError;

// Truncate error body to prevent leaking large or sensitive responses.
const MAX_ERROR_BODY: usize = 512;

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// Convert a non-2xx upstream response into an [`AiError::LlmHttp`].
pub async fn response_to_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message: error_message_from_body(&body),
        retry_after_secs: retry_after,
    }
}

/// Prefer OpenAI's `{"error":{"message":...}}` shape, else the raw body.
pub(crate) fn error_message_from_body(body: &str) -> String {
    let extracted = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| upstream_error_message(&json));

    truncate(extracted.as_deref().unwrap_or(body))
}

/// Message of an `error` member, whether it is an object or a bare string.
pub(crate) fn upstream_error_message(json: &Value) -> Option<String> {
    let error = json.get("error")?;
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    if error.is_null() {
        return None;
    }
    Some("An error occurred during streaming".to_string())
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
