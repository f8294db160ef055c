//! Error taxonomy shared by the REST boundary, the realtime connection and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a failure, used to pick a retry policy and a log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Server,
    Validation,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Server => "server",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Machine-readable code attached to an error: an HTTP or close status, or a name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ErrorCode {
    Status(u16),
    Name(String),
}

/// Code attached to sends rejected because the current user is muted.
pub const MUTED_CODE: &str = "MUTED";

/// Normalized error surfaced to callers and kept as `error` / `last_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{kind} error: {message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Prefix the message with the action that failed, e.g. `"load rooms: ..."`.
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
    }

    /// Send rejected by the mute gate.
    pub fn muted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
            .with_code(ErrorCode::Name(MUTED_CODE.to_string()))
    }

    pub fn is_muted(&self) -> bool {
        matches!(&self.code, Some(ErrorCode::Name(name)) if name == MUTED_CODE)
    }

    /// A local mute error, or a 403 whose message says the user is muted.
    pub fn is_mute_rejection(&self) -> bool {
        self.is_muted()
            || (self.code == Some(ErrorCode::Status(403))
                && crate::protocol::is_mute_message(&self.message))
    }

    /// Classify a non-success HTTP response.
    ///
    /// A string `message` in the JSON body replaces the default text. For 422
    /// the first entry of the `errors` map is used when no `message` is given.
    pub fn from_status(status: u16, body: &str) -> Self {
        let (kind, default_message, retryable) = match status {
            400 => (
                ErrorKind::Validation,
                "Invalid request. Please check your input.".to_string(),
                true,
            ),
            401 => (
                ErrorKind::Authentication,
                "Authentication required. Please log in again.".to_string(),
                false,
            ),
            403 => (
                ErrorKind::Authentication,
                "Access denied. You do not have permission to perform this action.".to_string(),
                false,
            ),
            404 => (
                ErrorKind::Validation,
                "The requested resource was not found.".to_string(),
                false,
            ),
            422 => (
                ErrorKind::Validation,
                "Validation failed. Please check your input.".to_string(),
                false,
            ),
            429 => (
                ErrorKind::Validation,
                "Too many requests. Please wait a moment before trying again.".to_string(),
                true,
            ),
            500 | 502 | 503 | 504 => (
                ErrorKind::Server,
                "Server error. Please try again later.".to_string(),
                true,
            ),
            other => (
                ErrorKind::Server,
                format!("Server error ({}). Please try again later.", other),
                true,
            ),
        };

        let message = server_message(status, body).unwrap_or(default_message);
        Self::new(kind, message, retryable).with_code(ErrorCode::Status(status))
    }

    /// Classify a realtime close/error code as sent by the broker.
    pub fn from_close_code(code: u16, reason: Option<&str>) -> Self {
        let (kind, message, retryable) = match code {
            4000 => (ErrorKind::Authentication, "Authentication failed", false),
            4001 => (ErrorKind::Authentication, "Authentication token expired", true),
            4004 => (ErrorKind::Network, "Connection limit exceeded", false),
            4100 => (ErrorKind::Network, "Connection refused", true),
            4200 => (ErrorKind::Timeout, "Connection timeout", true),
            4000..=4999 => (ErrorKind::Network, reason.unwrap_or("Connection failed"), true),
            _ => (ErrorKind::Unknown, reason.unwrap_or("An unknown error occurred"), true),
        };
        Self::new(kind, message, retryable).with_code(ErrorCode::Status(code))
    }
}

/// Extract a user-facing message from an error body.
pub fn server_message(status: u16, body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok()?;

    if let Some(message) = parsed.get("message").and_then(|m| m.as_str()) {
        if !message.trim().is_empty() {
            return Some(message.to_string());
        }
    }

    if status == 422 {
        let first = parsed
            .get("errors")
            .and_then(|e| e.as_object())
            .and_then(|errors| errors.values().next())
            .and_then(|field| field.as_array())
            .and_then(|msgs| msgs.first())
            .and_then(|m| m.as_str());
        if let Some(first) = first {
            return Some(first.to_string());
        }
    }

    None
}

/// Low-level REST failure produced by an API client before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Network(String),
    Timeout(String),
    Http { status: u16, body: String },
    Deserialize(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for ChatError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => ChatError::network(format!(
                "Network error. Please check your internet connection. ({})",
                msg
            )),
            ApiError::Timeout(_) => ChatError::timeout("Request timed out. Please try again."),
            ApiError::Http { status, body } => ChatError::from_status(status, &body),
            ApiError::Deserialize(msg) => ChatError::new(
                ErrorKind::Unknown,
                format!("Unexpected response from server: {}", msg),
                true,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(400, ErrorKind::Validation, true)]
    #[case(401, ErrorKind::Authentication, false)]
    #[case(403, ErrorKind::Authentication, false)]
    #[case(404, ErrorKind::Validation, false)]
    #[case(422, ErrorKind::Validation, false)]
    #[case(429, ErrorKind::Validation, true)]
    #[case(500, ErrorKind::Server, true)]
    #[case(503, ErrorKind::Server, true)]
    #[case(418, ErrorKind::Server, true)]
    fn classifies_http_status(#[case] status: u16, #[case] kind: ErrorKind, #[case] retryable: bool) {
        let err = ChatError::from_status(status, "");
        assert_eq!(err.kind, kind);
        assert_eq!(err.retryable, retryable);
        assert_eq!(err.code, Some(ErrorCode::Status(status)));
    }

    #[test]
    fn server_message_overrides_default() {
        let err = ChatError::from_status(500, r#"{"message":"database unavailable"}"#);
        assert_eq!(err.message, "database unavailable");
    }

    #[test]
    fn first_validation_error_is_used_for_422() {
        let body = r#"{"errors":{"name":["The name field is required."]}}"#;
        let err = ChatError::from_status(422, body);
        assert_eq!(err.message, "The name field is required.");
        assert!(!err.retryable);
    }

    #[rstest]
    #[case(ChatError::muted("You are muted"), true)]
    #[case(ChatError::from_status(403, r#"{"message":"You have been muted"}"#), true)]
    #[case(ChatError::from_status(403, ""), false)]
    #[case(ChatError::from_status(404, r#"{"message":"muted room gone"}"#), false)]
    fn recognizes_mute_rejections(#[case] err: ChatError, #[case] expected: bool) {
        assert_eq!(err.is_mute_rejection(), expected);
    }

    #[rstest]
    #[case(4000, ErrorKind::Authentication, false)]
    #[case(4001, ErrorKind::Authentication, true)]
    #[case(4004, ErrorKind::Network, false)]
    #[case(4100, ErrorKind::Network, true)]
    #[case(4200, ErrorKind::Timeout, true)]
    #[case(4321, ErrorKind::Network, true)]
    fn classifies_close_codes(#[case] code: u16, #[case] kind: ErrorKind, #[case] retryable: bool) {
        let err = ChatError::from_close_code(code, None);
        assert_eq!(err.kind, kind);
        assert_eq!(err.retryable, retryable);
    }

    #[test]
    fn api_error_conversion_keeps_retry_policy() {
        let err: ChatError = ApiError::Network("connection reset".into()).into();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);

        let err: ChatError = ApiError::Timeout("elapsed".into()).into();
        assert_eq!(err.kind, ErrorKind::Timeout);

        let err: ChatError = ApiError::Http { status: 401, body: String::new() }.into();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(!err.retryable);
    }

    #[test]
    fn muted_errors_are_recognisable() {
        let err = ChatError::muted("You are muted");
        assert!(err.is_muted());
        assert!(!err.retryable);
        assert!(!ChatError::validation("empty").is_muted());
    }
}
