//! Session state owned by the controller
//!
//! A single `SessionState` describes the current authentication stage, the
//! issued tokens, the PKCE material of the current epoch and the error last
//! recorded. It is only ever replaced wholesale by the transition engine;
//! observers receive cloned snapshots.

use common::Secret;
use serde::Serialize;

use crate::constants::DEFAULT_SECURITY_LEVEL;
use crate::error::SessionError;

/// Point in the authentication flow.
///
/// Ordered: `Initiation < Processing < Success`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Initiation,
    Processing,
    Success,
}

impl Stage {
    /// Stage label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Initiation => "initiation",
            Stage::Processing => "processing",
            Stage::Success => "success",
        }
    }
}

/// Authentication session state.
///
/// Timestamps are unix milliseconds. `timeout_armed` mirrors whether the
/// supervisor currently holds an expiry timer for this session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub stage: Stage,
    pub is_authenticated: bool,
    pub is_processing: bool,
    pub auth_token: Option<Secret<String>>,
    pub session_id: Option<String>,
    pub security_level: String,
    pub error: Option<SessionError>,
    pub pkce_verifier: Option<Secret<String>>,
    pub pkce_challenge: Option<String>,
    pub anti_forgery_state: Option<Secret<String>>,
    pub session_start_time: Option<u64>,
    pub last_activity_time: Option<u64>,
    pub token_expires_at: Option<u64>,
    pub timeout_armed: bool,
}

impl SessionState {
    /// The state at process start and after every reset.
    pub fn initial() -> Self {
        Self {
            stage: Stage::Initiation,
            is_authenticated: false,
            is_processing: false,
            auth_token: None,
            session_id: None,
            security_level: DEFAULT_SECURITY_LEVEL.to_string(),
            error: None,
            pkce_verifier: None,
            pkce_challenge: None,
            anti_forgery_state: None,
            session_start_time: None,
            last_activity_time: None,
            token_expires_at: None,
            timeout_armed: false,
        }
    }

    /// Whether `initiate()` has produced PKCE material for this epoch.
    pub fn is_initiated(&self) -> bool {
        self.session_start_time.is_some()
            && self.pkce_verifier.is_some()
            && self.anti_forgery_state.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}
