//! Silent-authentication session controller
//!
//! Client-side state machine for an OAuth 2.0 authorization-code + PKCE
//! flow: stage tracking, PKCE and anti-forgery state generation, callback
//! validation, a fixed-window session timeout and stage-based route guarding.
//! No token validation or provider I/O happens here; the token exchange is an
//! injected collaborator.
//!
//! Flow:
//! 1. UI calls `AuthController::initiate()` → PKCE epoch created, timer armed
//! 2. UI builds the provider URL via `pkce::build_authorization_url()`
//! 3. UI calls `begin_processing()` when the processing screen opens
//! 4. Provider callback → `complete_authentication(code, state)` → exchange
//! 5. Success disarms the timer; `reset()` or expiry returns to the start
//!
//! Navigation events go through `AuthController::navigate()`, which consults
//! the route guard and redirects through the injected `Navigator`.

pub mod constants;
pub mod controller;
pub mod error;
pub mod exchange;
pub mod guard;
pub mod machine;
pub mod pkce;
pub mod state;
pub mod timeout;

pub use controller::{AuthController, ControllerSettings};
pub use error::{AuthError, ErrorKind, Result, SessionError};
pub use exchange::{SimulatedExchange, TokenExchange, TokenGrant};
pub use guard::{GuardDecision, Navigator, Route};
pub use machine::{AuthAction, AuthEvent, Transition, handle_event};
pub use pkce::{
    AuthorizationParams, AuthorizationRequest, EntropySource, OsEntropy, PkceParams,
    build_authorization_url,
};
pub use state::{SessionState, Stage};
pub use timeout::TimeoutSupervisor;
