//! HTTP surface of the simulator
//!
//! The three screen paths go through the controller's route guard and
//! answer with a JSON view of the session (or a 307 to the initiation
//! screen). The `/auth/*` endpoints drive the controller operations, with
//! `/auth/callback` playing the provider redirect target.
//!
//! Session views never include the access token, the PKCE verifier or the
//! stored anti-forgery state.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use session_auth::{
    AuthController, AuthError, AuthorizationParams, ErrorKind, GuardDecision, Route,
    SessionError, SessionState, Stage,
};
use tracing::{Instrument, info_span};

use crate::navigator::TracingNavigator;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: AuthController,
    pub navigator: Arc<TracingNavigator>,
    pub authorization: Arc<AuthorizationParams>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    fn session_view(&self) -> SessionView {
        SessionView::new(&self.controller.snapshot(), self.navigator.last_redirect())
    }
}

/// Public projection of `SessionState`.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub stage: Stage,
    pub is_authenticated: bool,
    pub is_processing: bool,
    pub has_auth_token: bool,
    pub session_id: Option<String>,
    pub security_level: String,
    pub error: Option<SessionError>,
    pub pkce_challenge: Option<String>,
    pub session_start_time: Option<u64>,
    pub last_activity_time: Option<u64>,
    pub token_expires_at: Option<u64>,
    pub timeout_armed: bool,
    pub last_redirect: Option<Route>,
}

impl SessionView {
    pub fn new(state: &SessionState, last_redirect: Option<Route>) -> Self {
        Self {
            stage: state.stage,
            is_authenticated: state.is_authenticated,
            is_processing: state.is_processing,
            has_auth_token: state.auth_token.is_some(),
            session_id: state.session_id.clone(),
            security_level: state.security_level.clone(),
            error: state.error.clone(),
            pkce_challenge: state.pkce_challenge.clone(),
            session_start_time: state.session_start_time,
            last_activity_time: state.last_activity_time,
            token_expires_at: state.token_expires_at,
            timeout_armed: state.timeout_armed,
            last_redirect,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: String,
    state: String,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route(Route::INITIATION_PATH, get(page_handler))
        .route(Route::PROCESSING_PATH, get(page_handler))
        .route(Route::SUCCESS_PATH, get(page_handler))
        .route("/auth/initiate", post(initiate_handler))
        .route("/auth/processing", post(processing_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/activity", post(activity_handler))
        .route("/auth/reset", post(reset_handler))
        .route("/auth/session", get(session_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Tag each request with an id, run it inside a span carrying that id and
/// count it by matched route and status.
async fn track_request(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        route = %route,
    );

    let mut response = next.run(request).instrument(span).await;
    crate::metrics::record_request(&route, response.status().as_u16());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(err: &AuthError) -> Response {
    let status = match err.kind() {
        ErrorKind::InitializationError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::StateMismatch => StatusCode::FORBIDDEN,
        ErrorKind::AuthExchangeError => StatusCode::BAD_GATEWAY,
        ErrorKind::SessionTimeout => StatusCode::UNAUTHORIZED,
    };
    json_response(
        status,
        serde_json::json!({
            "error": {
                "type": err.kind(),
                "message": err.to_string(),
            }
        }),
    )
}

/// Screen navigation, checked by the route guard.
async fn page_handler(State(state): State<AppState>, uri: Uri) -> Response {
    match state.controller.navigate(uri.path()) {
        GuardDecision::Allow(route) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "route": route,
                "path": route.path(),
                "session": state.session_view(),
            }),
        ),
        GuardDecision::Redirect(target) => Redirect::temporary(target.path()).into_response(),
        GuardDecision::Unguarded => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start a session and hand back the provider URL to visit.
async fn initiate_handler(State(state): State<AppState>) -> Response {
    let request = match state.controller.initiate().await {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authorization_url": request.url(&state.authorization),
            "session": state.session_view(),
        }),
    )
}

async fn processing_handler(State(state): State<AppState>) -> Response {
    match state.controller.begin_processing().await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "session": state.session_view() }),
        ),
        Err(e) => error_response(&e),
    }
}

/// Provider redirect target. On success the browser is sent to the dashboard.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state
        .controller
        .complete_authentication(&params.code, &params.state)
        .await
    {
        Ok(()) => Redirect::to(Route::SUCCESS_PATH).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn activity_handler(State(state): State<AppState>) -> StatusCode {
    state.controller.record_activity().await;
    StatusCode::NO_CONTENT
}

async fn reset_handler(State(state): State<AppState>) -> Redirect {
    state.controller.reset().await;
    Redirect::to(Route::INITIATION_PATH)
}

async fn session_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({ "session": state.session_view() }),
    )
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.controller.snapshot();
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "stage": snapshot.stage,
            "authenticated": snapshot.is_authenticated,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
