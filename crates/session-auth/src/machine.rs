//! Authentication state machine
//!
//! Pure state machine: receives events, returns (new_state, action, outcome).
//! The controller executes the I/O implied by each action (arming timers,
//! calling the token exchange, redirecting) and never edits the state itself.
//!
//! Stage progression:
//! - Initiation → Initiation (initiate, fresh PKCE epoch)
//! - Initiation → Processing (begin_processing, requires initiate)
//! - Initiation | Processing → Success (matching callback + exchange grant)
//! - any → Initiation (reset, timeout)

use common::Secret;

use crate::constants::DEFAULT_SECURITY_LEVEL;
use crate::error::{AuthError, Result, SessionError};
use crate::exchange::TokenGrant;
use crate::pkce::PkceParams;
use crate::state::{SessionState, Stage};

/// Events that drive state transitions.
#[derive(Debug)]
pub enum AuthEvent {
    /// PKCE material generated for a new session epoch
    Initiated(PkceParams),
    /// PKCE/state generation failed
    InitiationFailed(AuthError),
    /// UI moved to the processing screen
    ProcessingStarted,
    /// Provider redirected back with an authorization code
    CallbackReceived { code: String, state: String },
    /// Token exchange produced a grant
    ExchangeSucceeded(TokenGrant),
    /// Token exchange failed or timed out
    ExchangeFailed(String),
    /// User or system activity observed
    ActivityRecorded,
    /// Explicit logout/reset
    ResetRequested,
    /// The armed session timer fired
    TimedOut,
}

impl AuthEvent {
    /// Event label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AuthEvent::Initiated(_) => "initiated",
            AuthEvent::InitiationFailed(_) => "initiation_failed",
            AuthEvent::ProcessingStarted => "processing_started",
            AuthEvent::CallbackReceived { .. } => "callback_received",
            AuthEvent::ExchangeSucceeded(_) => "exchange_succeeded",
            AuthEvent::ExchangeFailed(_) => "exchange_failed",
            AuthEvent::ActivityRecorded => "activity_recorded",
            AuthEvent::ResetRequested => "reset_requested",
            AuthEvent::TimedOut => "timed_out",
        }
    }
}

/// Code and verifier handed to the token exchange collaborator.
#[derive(Debug)]
pub struct ExchangeRequest {
    pub code: String,
    pub verifier: Secret<String>,
}

/// Actions the controller should execute after a state transition
#[derive(Debug)]
pub enum AuthAction {
    /// Cancel any pending expiry timer and arm a fresh one
    ArmTimeout,
    /// Cancel the pending expiry timer
    DisarmTimeout,
    /// Run the token exchange, then feed back ExchangeSucceeded/ExchangeFailed
    Exchange(ExchangeRequest),
    /// Cancel the pending timer and send the UI back to the initiation entry
    RedirectToInitiation,
    /// No-op
    None,
}

/// Result of applying one event.
#[derive(Debug)]
pub struct Transition {
    pub state: SessionState,
    pub action: AuthAction,
    pub outcome: Result<()>,
}

impl Transition {
    fn ok(state: SessionState, action: AuthAction) -> Self {
        Self {
            state,
            action,
            outcome: Ok(()),
        }
    }

    /// Record `err` into the state and report it, leaving everything else as is.
    fn rejected(mut state: SessionState, err: AuthError) -> Self {
        state.error = Some(SessionError::from(&err));
        Self {
            state,
            action: AuthAction::None,
            outcome: Err(err),
        }
    }
}

/// Handle a state transition. Pure function: no I/O.
///
/// `now_millis` is the unix time used for every timestamp the event writes.
pub fn handle_event(state: SessionState, event: AuthEvent, now_millis: u64) -> Transition {
    match event {
        // Every initiate starts a new epoch: nothing from a previous session
        // (tokens, old PKCE material, errors) survives.
        AuthEvent::Initiated(pkce) => Transition::ok(
            SessionState {
                pkce_verifier: Some(pkce.verifier),
                pkce_challenge: Some(pkce.challenge),
                anti_forgery_state: Some(pkce.state),
                session_start_time: Some(now_millis),
                last_activity_time: Some(now_millis),
                timeout_armed: true,
                ..SessionState::initial()
            },
            AuthAction::ArmTimeout,
        ),

        AuthEvent::InitiationFailed(err) => {
            let err = match err {
                AuthError::Initialization(_) => err,
                other => AuthError::Initialization(other.to_string()),
            };
            // A failed re-initiate leaves the current epoch (PKCE material,
            // tokens, armed timer) in place; only the error is recorded.
            let state = SessionState {
                is_processing: false,
                last_activity_time: Some(now_millis),
                ..state
            };
            Transition::rejected(state, err)
        }

        AuthEvent::ProcessingStarted => {
            if state.stage == Stage::Success {
                return Transition::rejected(
                    state,
                    AuthError::InvalidTransition(
                        "cannot begin processing after authentication completed".into(),
                    ),
                );
            }
            if !state.is_initiated() {
                return Transition::rejected(
                    state,
                    AuthError::InvalidTransition("begin_processing requires initiate".into()),
                );
            }
            Transition::ok(
                SessionState {
                    stage: Stage::Processing,
                    is_processing: true,
                    error: None,
                    last_activity_time: Some(now_millis),
                    ..state
                },
                AuthAction::None,
            )
        }

        AuthEvent::CallbackReceived { code, state: echoed } => {
            if state.stage == Stage::Success {
                return Transition::rejected(
                    state,
                    AuthError::InvalidTransition("session already authenticated".into()),
                );
            }

            // No token field is touched on any path before this check passes.
            let verifier = match (&state.anti_forgery_state, &state.pkce_verifier) {
                (Some(expected), Some(verifier)) if expected.matches(&echoed) => {
                    Some(verifier.clone())
                }
                _ => None,
            };
            let Some(verifier) = verifier else {
                let state = SessionState {
                    is_processing: false,
                    ..state
                };
                return Transition::rejected(state, AuthError::StateMismatch);
            };

            Transition::ok(
                SessionState {
                    is_processing: true,
                    error: None,
                    last_activity_time: Some(now_millis),
                    ..state
                },
                AuthAction::Exchange(ExchangeRequest { code, verifier }),
            )
        }

        AuthEvent::ExchangeSucceeded(grant) => {
            if !state.is_processing || !state.is_initiated() || state.stage == Stage::Success {
                return Transition::rejected(
                    state,
                    AuthError::InvalidTransition("no token exchange in flight".into()),
                );
            }
            let token_expires_at = grant
                .expires_in
                .map(|secs| now_millis.saturating_add(secs.saturating_mul(1000)));
            Transition::ok(
                SessionState {
                    stage: Stage::Success,
                    is_authenticated: true,
                    is_processing: false,
                    auth_token: Some(grant.access_token),
                    session_id: Some(grant.session_id),
                    security_level: grant
                        .security_level
                        .filter(|level| !level.is_empty())
                        .unwrap_or_else(|| DEFAULT_SECURITY_LEVEL.to_string()),
                    error: None,
                    last_activity_time: Some(now_millis),
                    token_expires_at,
                    timeout_armed: false,
                    ..state
                },
                AuthAction::DisarmTimeout,
            )
        }

        AuthEvent::ExchangeFailed(message) => {
            let state = SessionState {
                is_processing: false,
                last_activity_time: Some(now_millis),
                ..state
            };
            Transition::rejected(state, AuthError::Exchange(message))
        }

        AuthEvent::ActivityRecorded => Transition::ok(
            SessionState {
                last_activity_time: Some(now_millis),
                ..state
            },
            AuthAction::None,
        ),

        AuthEvent::ResetRequested => {
            Transition::ok(SessionState::initial(), AuthAction::RedirectToInitiation)
        }

        AuthEvent::TimedOut => {
            let err = AuthError::SessionTimeout;
            Transition {
                state: SessionState {
                    error: Some(SessionError::from(&err)),
                    ..SessionState::initial()
                },
                action: AuthAction::RedirectToInitiation,
                outcome: Err(err),
            }
        }
    }
}
