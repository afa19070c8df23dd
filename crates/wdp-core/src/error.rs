//! Error types shared by the wdp crates.
//!
//! Upstream failures are described by [`NetworkError`]; problems with the
//! configured services surface as [`ConfigError`]. Both carry a
//! `user_message()` that is safe to hand to API clients.

use thiserror::Error;

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("API request failed with status: {status}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => "Unable to reach the upstream weather service.",
            NetworkError::Timeout => "The upstream weather service timed out.",
            NetworkError::Cancelled => {
                "The request was cancelled before the weather service answered."
            }
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The upstream weather service is experiencing issues."
            }
            NetworkError::ServerError { .. } => "The upstream weather service rejected the request.",
            NetworkError::InvalidResponse(_) => {
                "The upstream weather service returned an unexpected response."
            }
        }
    }

    /// Whether retrying the call could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::ConnectionFailed(_) | NetworkError::Timeout => true,
            NetworkError::ServerError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            NetworkError::InvalidResponse(_) | NetworkError::Cancelled => false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::MissingSetting(_) => "A required setting is missing. Check your settings.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display_matches_upstream_wording() {
        let err = NetworkError::ServerError {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "API request failed with status: 503");
    }

    #[test]
    fn test_transient_classification() {
        assert!(NetworkError::Timeout.is_transient());
        assert!(NetworkError::ConnectionFailed("reset".into()).is_transient());
        assert!(NetworkError::ServerError { status: 502, message: String::new() }.is_transient());
        assert!(NetworkError::ServerError { status: 429, message: String::new() }.is_transient());
        assert!(!NetworkError::ServerError { status: 404, message: String::new() }.is_transient());
        assert!(!NetworkError::InvalidResponse("bad json".into()).is_transient());
        assert!(!NetworkError::Cancelled.is_transient());
    }

    #[test]
    fn test_user_messages_distinguish_status_class() {
        let upstream_down = NetworkError::ServerError { status: 500, message: String::new() };
        let rejected = NetworkError::ServerError { status: 400, message: String::new() };
        assert_ne!(upstream_down.user_message(), rejected.user_message());
        assert!(!ConfigError::Invalid("x".into()).user_message().is_empty());
    }
}
