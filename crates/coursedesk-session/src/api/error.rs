use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Any other 4xx. Carries the server's message for display.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Prefer the `error` (or `message`) field of a JSON error body over the raw text.
    fn extract_message(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.error.or(parsed.message).unwrap_or_default(),
            Err(_) => Self::truncate_body(body),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let mut message = Self::extract_message(body);
        // Never hand an empty message to the user
        if message.trim().is_empty() {
            message = status.canonical_reason().unwrap_or("Request failed").to_string();
        }
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            429 => ApiError::RateLimited,
            code @ 400..=499 => ApiError::Rejected {
                status: code,
                message,
            },
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// The server refused the credential itself (401/403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::AccessDenied(_))
    }

    /// A 4xx answer with a message meant for the user, as returned by login/register.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::Rejected { message: m, .. } => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, "").is_auth_rejection());
        assert!(ApiError::from_status(StatusCode::FORBIDDEN, "").is_auth_rejection());
        assert!(!ApiError::from_status(StatusCode::NOT_FOUND, "").is_auth_rejection());
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(_)
        ));
    }

    #[test]
    fn test_error_field_becomes_message() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"error":"Email already registered"}"#);
        assert_eq!(err.user_message(), Some("Email already registered"));
        assert_eq!(err.to_string(), "Email already registered");

        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid credentials"}"#);
        assert_eq!(err.user_message(), Some("Invalid credentials"));
    }

    #[test]
    fn test_empty_body_falls_back_to_status_reason() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.user_message(), Some("Unauthorized"));

        let err = ApiError::from_status(StatusCode::CONFLICT, r#"{"error":"  "}"#);
        assert_eq!(err.user_message(), Some("Conflict"));
    }

    #[test]
    fn test_plain_body_is_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, &body);
        let message = err.user_message().unwrap();
        assert!(message.contains("truncated"));
        assert!(message.len() < body.len() + 40);
    }

    #[test]
    fn test_server_errors_have_no_user_message() {
        assert!(ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom")
            .user_message()
            .is_none());
        assert!(ApiError::Timeout.user_message().is_none());
    }
}
