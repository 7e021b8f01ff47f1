use thiserror::Error;

use crate::api::ApiError;

/// Typed rejection returned by the session controller.
///
/// Cloneable so one refresh result can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login or registration refused; the server's message, unchanged.
    #[error("{0}")]
    Validation(String),

    /// The credential was refused by the server. The session has been cleared.
    #[error("Session rejected: {0}")]
    Rejected(String),

    /// Network failure, timeout or server error. Stored state was left alone.
    #[error("Auth service unavailable: {0}")]
    Transient(String),

    #[error("No active session")]
    NotAuthenticated,
}

impl SessionError {
    /// Classify a failed verify/refresh call.
    pub(crate) fn from_session_call(err: ApiError) -> Self {
        if err.is_auth_rejection() {
            SessionError::Rejected(err.to_string())
        } else {
            SessionError::Transient(err.to_string())
        }
    }

    /// Classify a failed login/register call.
    pub(crate) fn from_credentials_call(err: ApiError) -> Self {
        match err.user_message() {
            Some(message) => SessionError::Validation(message.to_string()),
            None => SessionError::Transient(err.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient(_))
    }
}
