//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! AUTH_CLIENT_ID overrides `provider.client_id` so deployments can share
//! one TOML file across client registrations.

use serde::Deserialize;
use session_auth::{AuthorizationParams, ControllerSettings, SimulatedExchange};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session lifecycle windows
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
}

/// Public OAuth client registration used to build the authorization URL
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub authorize_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

/// Behaviour of the simulated token exchange
#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Empty string means the grant carries no level ("standard" applies)
    #[serde(default = "default_security_level")]
    pub security_level: String,
    #[serde(default = "default_expires_in")]
    pub expires_in_secs: u64,
    /// When set, every exchange fails with this message
    #[serde(default)]
    pub failure_message: Option<String>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_session_timeout() -> u64 {
    900
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_scopes() -> String {
    "openid".into()
}

fn default_latency_ms() -> u64 {
    2000
}

fn default_security_level() -> String {
    "high".into()
}

fn default_expires_in() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            exchange_timeout_secs: default_exchange_timeout(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            security_level: default_security_level(),
            expires_in_secs: default_expires_in(),
            failure_message: None,
        }
    }
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("AUTH_CLIENT_ID") {
            let client_id = client_id.trim().to_owned();
            if !client_id.is_empty() {
                config.provider.client_id = client_id;
            }
        }

        require_http_url("authorize_endpoint", &config.provider.authorize_endpoint)?;
        require_http_url("redirect_uri", &config.provider.redirect_uri)?;

        if config.provider.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if config.session.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.session.exchange_timeout_secs == 0 {
            return Err(common::Error::Config(
                "exchange_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-simulator.toml")
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            session_timeout: Duration::from_secs(self.session.timeout_secs),
            exchange_timeout: Duration::from_secs(self.session.exchange_timeout_secs),
        }
    }

    pub fn authorization_params(&self) -> AuthorizationParams {
        AuthorizationParams {
            authorize_endpoint: self.provider.authorize_endpoint.clone(),
            client_id: self.provider.client_id.clone(),
            redirect_uri: self.provider.redirect_uri.clone(),
            scopes: self.provider.scopes.clone(),
        }
    }

    pub fn simulated_exchange(&self) -> SimulatedExchange {
        let level = Some(self.exchange.security_level.clone()).filter(|l| !l.is_empty());
        let exchange = SimulatedExchange::new()
            .with_latency(Duration::from_millis(self.exchange.latency_ms))
            .with_security_level(level)
            .with_expires_in(self.exchange.expires_in_secs);
        match &self.exchange.failure_message {
            Some(message) => exchange.failing(message.clone()),
            None => exchange,
        }
    }
}
