//! Client-side error types.

use serde::Deserialize;

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Network(String),
    Http { status: u16, body: String },
    Deserialize(String),
}

impl ApiError {
    /// Best-effort user-facing message.
    ///
    /// For HTTP failures this prefers the server's `{"error": "..."}` body and
    /// falls back to the status code.
    pub fn message(&self) -> String {
        match self {
            ApiError::Http { status, body } => try_error_detail(body)
                .unwrap_or_else(|| format!("Request failed with status {status}")),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Attempt to parse the websoc error envelope (`{"error": "..."}`) into a
/// user-facing message.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    if parsed.error.trim().is_empty() {
        return None;
    }
    Some(parsed.error)
}
