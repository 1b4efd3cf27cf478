//! PKCE (Proof Key for Code Exchange) and anti-forgery state generation
//!
//! Produces the verifier/challenge pair and the `state` nonce minted on every
//! `initiate()`. The verifier stays with the controller and is handed to the
//! token exchange; the challenge and state travel in the authorization URL.
//!
//! Randomness comes from an `EntropySource`. The OS source is fallible, and a
//! failure surfaces as `AuthError::Initialization` rather than a panic.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use sha2::{Digest, Sha256};

use crate::constants::{STATE_BYTES, VERIFIER_BYTES};
use crate::error::{AuthError, Result};

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `dest` entirely, or fail with `AuthError::Initialization`.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        getrandom::getrandom(dest).map_err(|e| {
            AuthError::Initialization(format!("secure random source unavailable: {e}"))
        })
    }
}

/// Fresh PKCE material for one session epoch.
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub verifier: Secret<String>,
    pub challenge: String,
    pub state: Secret<String>,
}

impl PkceParams {
    /// The parts of this epoch that travel in the authorization URL.
    pub fn authorization_request(&self) -> AuthorizationRequest {
        AuthorizationRequest {
            challenge: self.challenge.clone(),
            state: self.state.clone(),
        }
    }
}

/// Challenge and anti-forgery state minted by one `initiate()`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub challenge: String,
    pub state: Secret<String>,
}

impl AuthorizationRequest {
    /// Provider URL for this epoch.
    pub fn url(&self, params: &AuthorizationParams) -> String {
        build_authorization_url(params, self.state.expose(), &self.challenge)
    }
}

/// Generate a PKCE code verifier.
///
/// 32 random bytes encoded as URL-safe base64 without padding: 43 characters,
/// the RFC 7636 minimum.
pub fn generate_verifier(entropy: &dyn EntropySource) -> Result<String> {
    let mut bytes = [0u8; VERIFIER_BYTES];
    entropy.fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, hashing the UTF-8 bytes of the
/// encoded verifier string.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate the anti-forgery `state` parameter (16 random bytes, 22 chars).
pub fn generate_state(entropy: &dyn EntropySource) -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    entropy.fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate verifier, challenge and state in one go.
pub fn generate(entropy: &dyn EntropySource) -> Result<PkceParams> {
    let verifier = generate_verifier(entropy)?;
    let challenge = compute_challenge(&verifier);
    let state = generate_state(entropy)?;
    Ok(PkceParams {
        verifier: Secret::new(verifier),
        challenge,
        state: Secret::new(state),
    })
}

/// Public client settings for the authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    pub authorize_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: String,
}

/// Build the authorization URL the browser is sent to after `initiate()`.
pub fn build_authorization_url(params: &AuthorizationParams, state: &str, challenge: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        params.authorize_endpoint,
        urlencoded(&params.client_id),
        urlencoded(&params.redirect_uri),
        urlencoded(&params.scopes),
        challenge,
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => out.push_str("%20"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '#' => out.push_str("%23"),
            '+' => out.push_str("%2B"),
            _ => out.push(c),
        }
    }
    out
}
