//! Token exchange collaborator
//!
//! The controller never talks to an authorization server itself. After the
//! anti-forgery check passes it hands `(code, verifier)` to a `TokenExchange`
//! implementation and records whatever grant or failure comes back.
//!
//! `SimulatedExchange` stands in for the provider: fixed latency, mock token
//! values, optional forced failure. Tests and the simulator service use it.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use tracing::debug;

use crate::error::{AuthError, Result};

/// Tokens issued by a successful exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    pub session_id: String,
    /// Advisory trust tier; `None` falls back to "standard".
    pub security_level: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: Option<u64>,
}

/// Exchanges an authorization code for tokens.
///
/// Implementations carry their own transport timeouts; the controller adds
/// an outer bound as well and reports expiry as `AuthError::Exchange`.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenExchange>`).
pub trait TokenExchange: Send + Sync {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + 'a>>;
}

/// Provider stand-in with a configurable latency and failure profile.
#[derive(Debug, Clone)]
pub struct SimulatedExchange {
    latency: Duration,
    security_level: Option<String>,
    expires_in: u64,
    failure: Option<String>,
}

impl SimulatedExchange {
    /// Two second round trip, "high" security level, one hour token.
    pub fn new() -> Self {
        Self {
            latency: Duration::from_secs(2),
            security_level: Some("high".into()),
            expires_in: 3600,
            failure: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_security_level(mut self, level: Option<String>) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = secs;
        self
    }

    /// Make every exchange fail with `message` after the latency elapses.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenExchange for SimulatedExchange {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;

            if code.is_empty() || verifier.is_empty() {
                return Err(AuthError::Exchange(
                    "authorization code and verifier are required".into(),
                ));
            }
            if let Some(message) = &self.failure {
                return Err(AuthError::Exchange(message.clone()));
            }

            let now_millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            debug!(latency_ms = self.latency.as_millis() as u64, "simulated token exchange issued grant");

            Ok(TokenGrant {
                access_token: Secret::new(format!("mock_access_token_{now_millis}")),
                session_id: format!("session_{now_millis}"),
                security_level: self.security_level.clone(),
                expires_in: Some(self.expires_in),
            })
        })
    }
}
