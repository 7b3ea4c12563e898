//! Unified error model for the session core and the credentialed API client.
//! One enum covers exchange failures, request failures and provider failures so the
//! session read model can carry whichever one happened last.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TokenUnavailable,
    BackendRejected,
    Network,
    Unauthorized,
    MalformedResponse,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionError {
    /// The identity could not mint a proof token (expired or revoked credential).
    #[error("token_unavailable: {message}")]
    TokenUnavailable { message: String },
    /// The backend answered with a non-success status other than 401/403.
    #[error("backend_rejected: {status}: {message}")]
    BackendRejected { status: u16, message: String },
    #[error("network: {message}")]
    Network { message: String },
    /// 401/403 from the backend: the session is no longer trusted server-side.
    #[error("unauthorized: {status}: {message}")]
    Unauthorized { status: u16, message: String },
    #[error("malformed_response: {message}")]
    MalformedResponse { message: String },
    #[error("provider: {message}")]
    Provider { message: String },
}

/// Errors surfaced by the session exchange service.
pub type ExchangeError = SessionError;
/// Errors surfaced by the credentialed request client.
pub type RequestError = SessionError;

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub fn token_unavailable<S: Into<String>>(msg: S) -> Self { SessionError::TokenUnavailable { message: msg.into() } }
    pub fn network<S: Into<String>>(msg: S) -> Self { SessionError::Network { message: msg.into() } }
    pub fn malformed<S: Into<String>>(msg: S) -> Self { SessionError::MalformedResponse { message: msg.into() } }
    pub fn provider<S: Into<String>>(msg: S) -> Self { SessionError::Provider { message: msg.into() } }

    /// Map a non-success HTTP status to the matching error.
    pub fn from_status<S: Into<String>>(status: u16, msg: S) -> Self {
        match status {
            401 | 403 => SessionError::Unauthorized { status, message: msg.into() },
            _ => SessionError::BackendRejected { status, message: msg.into() },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::TokenUnavailable { .. } => ErrorKind::TokenUnavailable,
            SessionError::BackendRejected { .. } => ErrorKind::BackendRejected,
            SessionError::Network { .. } => ErrorKind::Network,
            SessionError::Unauthorized { .. } => ErrorKind::Unauthorized,
            SessionError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            SessionError::Provider { .. } => ErrorKind::Provider,
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self.kind() {
            ErrorKind::TokenUnavailable => "token_unavailable",
            ErrorKind::BackendRejected => "backend_rejected",
            ErrorKind::Network => "network",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Provider => "provider",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SessionError::TokenUnavailable { message }
            | SessionError::BackendRejected { message, .. }
            | SessionError::Network { message }
            | SessionError::Unauthorized { message, .. }
            | SessionError::MalformedResponse { message }
            | SessionError::Provider { message } => message.as_str(),
        }
    }

    /// HTTP status that produced this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::BackendRejected { status, .. } | SessionError::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same call without user interaction can reasonably succeed.
    /// Token and authorization failures need a fresh sign-in; malformed responses are
    /// contract violations and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network { .. } | SessionError::BackendRejected { .. })
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SessionError::malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            return SessionError::from_status(status.as_u16(), err.to_string());
        }
        // connect, timeout, body and redirect failures
        SessionError::network(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SessionError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SessionError::network("deadline elapsed")
    }
}
