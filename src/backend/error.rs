//! Backend collaborator error types

use thiserror::Error;

/// Error returned by any managed-backend collaborator, with classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unauthorized, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::AccessDenied, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Validation, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Malformed, message)
    }

    pub fn empty_response(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::EmptyResponse, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Server, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unknown, message)
    }

    /// Classify an HTTP status returned by a collaborator endpoint
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => Self::unauthorized(format!("Not signed in: {body}")),
            403 => Self::access_denied(format!("Access denied: {body}")),
            400 | 422 => Self::validation(format!("Rejected request: {body}")),
            500..=599 => Self::server(format!("Server error ({status}): {body}")),
            _ => Self::unknown(format!("Unexpected status {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Error classification used for user-facing recovery messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Transport failures, timeouts, dropped connections
    Network,
    /// No valid session for the caller
    Unauthorized,
    /// Session is valid but lacks permission
    AccessDenied,
    /// Request rejected as invalid
    Validation,
    /// Response did not have the expected shape
    Malformed,
    /// Response was well-formed but carried no text
    EmptyResponse,
    /// 5xx from the managed backend
    Server,
    Unknown,
}

impl BackendErrorKind {
    /// Classify a GraphQL `errorType` string
    pub fn from_graphql_type(error_type: &str) -> Self {
        match error_type {
            "Unauthorized" | "UnauthorizedException" => Self::Unauthorized,
            "AccessDeniedException" => Self::AccessDenied,
            "ValidationException" | "ValidationError" => Self::Validation,
            "ServiceUnavailableException" | "InternalFailure" => Self::Server,
            _ => Self::Unknown,
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Server)
    }
}
