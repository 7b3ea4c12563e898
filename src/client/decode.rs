use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RequestError, SessionError};

/// Human-readable failure text for a non-success response: `"<status> <reason>"`, followed by
/// the backend's own message when the body is JSON carrying one.
pub fn describe_failure(status: u16, reason: &str, body: &str) -> String {
    let head = if reason.is_empty() { status.to_string() } else { format!("{} {}", status, reason) };
    match serde_json::from_str::<Value>(body).ok().as_ref().and_then(extract_message) {
        Some(msg) => format!("{}: {}", head, msg),
        None => head,
    }
}

// Accepts {"error":"..."}, {"error":{"message":"..."}} and {"message":"..."}.
fn extract_message(v: &Value) -> Option<String> {
    if let Some(e) = v.get("error") {
        if let Some(s) = e.as_str() {
            return Some(s.to_string());
        }
        if let Some(s) = e.get("message").and_then(|m| m.as_str()) {
            return Some(s.to_string());
        }
        if !e.is_null() {
            return Some(e.to_string());
        }
    }
    v.get("message").and_then(|m| m.as_str()).map(str::to_string)
}

/// Decode a success body. An empty body reads as `{}`.
pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, RequestError> {
    let text = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str::<T>(text).map_err(|e| SessionError::malformed(format!("response is not the expected JSON: {}", e)))
}
