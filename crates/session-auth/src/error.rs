//! Error taxonomy for the authentication session controller
//!
//! Every failure is recorded into `SessionState::error` as a `SessionError`
//! and also returned to the caller of the operation that produced it. None
//! of them are fatal to the host process.

use serde::Serialize;

/// Errors from controller operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// PKCE/state generation failed (e.g. random source unavailable).
    /// Terminal for that attempt; the caller must `initiate()` again.
    #[error("failed to initialize authentication: {0}")]
    Initialization(String),

    /// Illegal stage jump. Indicates a UI sequencing bug.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Callback state did not match the stored anti-forgery state.
    #[error("invalid state parameter")]
    StateMismatch,

    /// The token exchange collaborator failed or timed out.
    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// The unauthenticated session outlived its window.
    #[error("session expired for security")]
    SessionTimeout,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Initialization(_) => ErrorKind::InitializationError,
            AuthError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            AuthError::StateMismatch => ErrorKind::StateMismatch,
            AuthError::Exchange(_) => ErrorKind::AuthExchangeError,
            AuthError::SessionTimeout => ErrorKind::SessionTimeout,
        }
    }
}

/// Result alias for controller operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error category as surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InitializationError,
    InvalidTransition,
    StateMismatch,
    AuthExchangeError,
    SessionTimeout,
}

impl ErrorKind {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InitializationError => "initialization_error",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::StateMismatch => "state_mismatch",
            ErrorKind::AuthExchangeError => "auth_exchange_error",
            ErrorKind::SessionTimeout => "session_timeout",
        }
    }
}

/// Last recorded failure, as stored in `SessionState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AuthError> for SessionError {
    fn from(err: &AuthError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
