//! Error taxonomy for backend operations and the notifications they turn into.

use thiserror::Error;

use crate::domain::{MemoAction, MemoStatus};

/// Errors returned by the API client and the services built on it
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Transport failure, timeout, or server-side outage. Safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed input the user can fix
    #[error("Validation error: {0}")]
    Validation(String),

    /// Action attempted against the wrong memo status
    #[error("Cannot {action} memo{}", describe_status(.from))]
    InvalidTransition {
        action: MemoAction,
        from: Option<MemoStatus>,
    },

    /// The CRM or its OAuth server refused the request
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend answered with a body we could not interpret
    #[error("Unexpected response: {0}")]
    Decode(String),
}

fn describe_status(from: &Option<MemoStatus>) -> String {
    match from {
        Some(status) => format!(" in status {}", status),
        None => String::new(),
    }
}

impl ApiError {
    /// Only transport-level failures may be retried blindly
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    /// Convert to the transient message shown to the user
    pub fn to_notification(&self) -> Notification {
        match self {
            ApiError::Network(_) => Notification::error(
                "Could not reach the server. Check your connection and try again.",
            ),
            ApiError::Validation(message) => Notification::warning(message.clone()),
            ApiError::InvalidTransition { .. } => Notification::error(
                "This memo changed since it was loaded. Refresh it and try again.",
            ),
            ApiError::Provider { provider, message } => {
                Notification::error(format!("{}: {}", provider, message))
            }
            ApiError::NotFound(what) => Notification::warning(format!("{} was not found", what)),
            ApiError::Decode(_) => {
                Notification::error("The server sent an unexpected response. Please try again.")
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A transient, user-visible message produced at a mutation boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = match self.level {
            NotificationLevel::Info => "ℹ️ ",
            NotificationLevel::Warning => "⚠️ ",
            NotificationLevel::Error => "❌",
        };
        write!(f, "{} {}", marker, self.message)
    }
}
