//! Route guard
//!
//! Maps navigation targets to the stage they require and redirects to the
//! initiation entry point when the current session does not qualify:
//!
//! | Route | Requirement |
//! |---|---|
//! | `/`, `/o-auth-authentication-initiation` | none |
//! | `/authentication-processing` | `initiate()` has run |
//! | `/authentication-success-dashboard` | `is_authenticated` |
//!
//! This is UX-level guarding only. It is not a security boundary: nothing on
//! a server enforces it, and a client can render any screen it likes.

use serde::Serialize;

use crate::state::SessionState;

/// Navigation targets known to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Initiation,
    Processing,
    SuccessDashboard,
}

impl Route {
    pub const INITIATION_PATH: &'static str = "/o-auth-authentication-initiation";
    pub const PROCESSING_PATH: &'static str = "/authentication-processing";
    pub const SUCCESS_PATH: &'static str = "/authentication-success-dashboard";

    /// Canonical path of the route.
    pub fn path(&self) -> &'static str {
        match self {
            Route::Initiation => Self::INITIATION_PATH,
            Route::Processing => Self::PROCESSING_PATH,
            Route::SuccessDashboard => Self::SUCCESS_PATH,
        }
    }

    /// Resolve a request path. Trailing slashes are ignored; `/` is the
    /// initiation entry. Unknown paths return `None` and are not guarded.
    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" | Self::INITIATION_PATH => Some(Route::Initiation),
            Self::PROCESSING_PATH => Some(Route::Processing),
            Self::SUCCESS_PATH => Some(Route::SuccessDashboard),
            _ => None,
        }
    }

    /// Whether `state` satisfies this route's requirement.
    pub fn permits(&self, state: &SessionState) -> bool {
        match self {
            Route::Initiation => true,
            Route::Processing => state.is_initiated(),
            Route::SuccessDashboard => state.is_authenticated,
        }
    }
}

/// Outcome of checking a navigation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Target is known and its requirement is met
    Allow(Route),
    /// Requirement unmet; send the user here instead
    Redirect(Route),
    /// Target is not a guarded route
    Unguarded,
}

/// Check a navigation to `path` against the current session.
pub fn check(path: &str, state: &SessionState) -> GuardDecision {
    match Route::from_path(path) {
        Some(route) if route.permits(state) => GuardDecision::Allow(route),
        Some(_) => GuardDecision::Redirect(Route::Initiation),
        None => GuardDecision::Unguarded,
    }
}

/// Receives redirect instructions from the guard and the timeout supervisor.
///
/// Implemented by the UI router. Called while the controller holds its
/// state lock, so implementations must not call back into the controller.
pub trait Navigator: Send + Sync {
    fn redirect(&self, route: Route);
}
