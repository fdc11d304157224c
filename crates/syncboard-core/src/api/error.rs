use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Message used when a failed response carries no usable `detail`
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Errors surfaced to callers of `ApiClient`.
///
/// An expired session is not an error: it is reported as
/// `Response::SessionExpired` after the session has been cleared.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-2xx response other than 401. Displays as the server's message.
    #[error("{message}")]
    ServerRejected { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Credential cannot be sent as a header value")]
    InvalidCredential,
}

impl ApiError {
    /// Build a `ServerRejected` from a failed response body
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|parsed| Self::detail_message(&parsed))
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
        ApiError::ServerRejected { status, message }
    }

    /// Extract `detail`: a plain string, or the `msg` fields of a
    /// validation error list joined with "; ".
    fn detail_message(body: &Value) -> Option<String> {
        match body.get("detail")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(entries) => {
                let msgs: Vec<&str> = entries
                    .iter()
                    .filter_map(|e| e.get("msg").and_then(Value::as_str))
                    .collect();
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.join("; "))
                }
            }
            _ => None,
        }
    }

    /// Status code for server-reported failures
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::ServerRejected { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }
}
