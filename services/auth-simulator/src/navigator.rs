//! Redirect sink for the simulator
//!
//! The controller issues redirects (guard denials, reset, session expiry)
//! without knowing who renders them. Here they are logged and the most
//! recent one is kept so the next session view can report it.

use std::sync::Mutex;

use session_auth::{Navigator, Route};
use tracing::info;

#[derive(Debug, Default)]
pub struct TracingNavigator {
    last: Mutex<Option<Route>>,
}

impl TracingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent redirect issued by the controller, if any.
    pub fn last_redirect(&self) -> Option<Route> {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Navigator for TracingNavigator {
    fn redirect(&self, route: Route) {
        info!(to = route.path(), "redirect issued");
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(route);
    }
}
