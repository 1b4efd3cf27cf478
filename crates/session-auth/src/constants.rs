//! Session controller constants
//!
//! Windows and sizes shared by the PKCE generator, the transition engine and
//! the timeout supervisor. Runtime overrides live in `ControllerSettings`.

use std::time::Duration;

/// Window after `session_start_time` at which an unauthenticated session
/// is forcibly reset. Measured from session start, not from last activity.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Upper bound on a single token exchange before it is reported as failed.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Random bytes behind the PKCE code verifier (43 base64url characters).
pub const VERIFIER_BYTES: usize = 32;

/// Random bytes behind the anti-forgery state (22 base64url characters).
pub const STATE_BYTES: usize = 16;

/// Security level assumed when the exchange result does not carry one.
pub const DEFAULT_SECURITY_LEVEL: &str = "standard";
