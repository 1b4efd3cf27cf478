//! Authentication session controller
//!
//! Owns the single `SessionState` and serializes every mutation through one
//! async mutex: the five public operations and the timeout fire event are
//! mutually exclusive critical sections. The token exchange runs inside the
//! critical section with `is_processing = true` published as the busy signal.
//!
//! Readers never take the lock. Every transition publishes a full snapshot
//! on a `watch` channel, so observers only ever see settled states.
//!
//! The controller is constructed once and shared by cloning (it is an `Arc`
//! internally); there is no process-wide instance.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::constants::{EXCHANGE_TIMEOUT, SESSION_TIMEOUT};
use crate::error::{AuthError, Result};
use crate::exchange::TokenExchange;
use crate::guard::{self, GuardDecision, Navigator, Route};
use crate::machine::{AuthAction, AuthEvent, ExchangeRequest, Transition, handle_event};
use crate::pkce::{self, AuthorizationRequest, EntropySource, OsEntropy};
use crate::state::SessionState;
use crate::timeout::TimeoutSupervisor;

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Fixed window from session start to forced expiry.
    pub session_timeout: Duration,
    /// Outer bound on a single token exchange.
    pub exchange_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            session_timeout: SESSION_TIMEOUT,
            exchange_timeout: EXCHANGE_TIMEOUT,
        }
    }
}

/// State guarded by the controller lock.
struct Core {
    state: SessionState,
    supervisor: TimeoutSupervisor,
}

struct Shared {
    core: Mutex<Core>,
    snapshot: watch::Sender<SessionState>,
    entropy: Arc<dyn EntropySource>,
    exchange: Arc<dyn TokenExchange>,
    navigator: Arc<dyn Navigator>,
    exchange_timeout: Duration,
}

/// Handle to the authentication session controller.
#[derive(Clone)]
pub struct AuthController {
    shared: Arc<Shared>,
}

impl AuthController {
    /// Create a controller using the operating system's random source.
    pub fn new(
        settings: ControllerSettings,
        exchange: Arc<dyn TokenExchange>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_entropy(settings, Arc::new(OsEntropy), exchange, navigator)
    }

    /// Create a controller with an explicit random source.
    pub fn with_entropy(
        settings: ControllerSettings,
        entropy: Arc<dyn EntropySource>,
        exchange: Arc<dyn TokenExchange>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionState::initial());
        info!(
            session_timeout_secs = settings.session_timeout.as_secs(),
            exchange_timeout_secs = settings.exchange_timeout.as_secs(),
            "authentication controller initialized"
        );
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state: SessionState::initial(),
                    supervisor: TimeoutSupervisor::new(settings.session_timeout),
                }),
                snapshot,
                entropy,
                exchange,
                navigator,
                exchange_timeout: settings.exchange_timeout,
            }),
        }
    }

    /// Start a new session epoch: fresh PKCE verifier/challenge and
    /// anti-forgery state, timer (re)armed.
    ///
    /// Returns the challenge and state minted for this epoch, for building
    /// the authorization URL. Generation failure is recorded as
    /// `InitializationError` and returned; it is not retried.
    pub async fn initiate(&self) -> Result<AuthorizationRequest> {
        let mut core = self.shared.core.lock().await;
        match pkce::generate(self.shared.entropy.as_ref()) {
            Ok(params) => {
                let request = params.authorization_request();
                self.apply(&mut core, AuthEvent::Initiated(params)).1?;
                Ok(request)
            }
            Err(e) => {
                let outcome = self
                    .apply(&mut core, AuthEvent::InitiationFailed(e.clone()))
                    .1;
                Err(outcome.err().unwrap_or(e))
            }
        }
    }

    /// Move to the processing stage. Requires a prior `initiate()`.
    pub async fn begin_processing(&self) -> Result<()> {
        let mut core = self.shared.core.lock().await;
        self.apply(&mut core, AuthEvent::ProcessingStarted).1
    }

    /// Validate the callback's `state` and exchange `code` for tokens.
    ///
    /// A mismatched state is rejected before the exchange is attempted and
    /// before any token field is written.
    ///
    /// Runs on its own task: if the caller stops waiting, the exchange still
    /// completes and its outcome is recorded, so `is_processing` never
    /// outlives the exchange.
    pub async fn complete_authentication(&self, code: &str, state: &str) -> Result<()> {
        let controller = self.clone();
        let (code, state) = (code.to_string(), state.to_string());
        let task = tokio::spawn(async move { controller.handle_callback(code, state).await });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "callback task failed");
                let err = AuthError::Exchange(format!("exchange task failed: {e}"));
                let mut core = self.shared.core.lock().await;
                if core.state.is_processing {
                    let _ = self.apply(&mut core, AuthEvent::ExchangeFailed(err.to_string()));
                }
                Err(err)
            }
        }
    }

    async fn handle_callback(&self, code: String, state: String) -> Result<()> {
        let mut core = self.shared.core.lock().await;
        let (request, outcome) =
            self.apply(&mut core, AuthEvent::CallbackReceived { code, state });
        outcome?;
        let Some(ExchangeRequest { code, verifier }) = request else {
            return Ok(());
        };

        let started = tokio::time::Instant::now();
        let result = match tokio::time::timeout(
            self.shared.exchange_timeout,
            self.shared.exchange.exchange(&code, verifier.expose()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AuthError::Exchange(format!(
                "no response within {}s",
                self.shared.exchange_timeout.as_secs()
            ))),
        };
        metrics::histogram!("auth_exchange_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let event = match result {
            Ok(grant) => AuthEvent::ExchangeSucceeded(grant),
            Err(AuthError::Exchange(message)) => AuthEvent::ExchangeFailed(message),
            Err(other) => AuthEvent::ExchangeFailed(other.to_string()),
        };
        self.apply(&mut core, event).1
    }

    /// Note user/system activity. Does not extend the session window.
    pub async fn record_activity(&self) {
        let mut core = self.shared.core.lock().await;
        let _ = self.apply(&mut core, AuthEvent::ActivityRecorded);
    }

    /// Return to the initial state, cancel the timer and drop all secrets.
    pub async fn reset(&self) {
        let mut core = self.shared.core.lock().await;
        let _ = self.apply(&mut core, AuthEvent::ResetRequested);
    }

    /// Check an externally observed navigation and redirect if it is not
    /// permitted for the current stage.
    pub fn navigate(&self, path: &str) -> GuardDecision {
        let decision = guard::check(path, &self.shared.snapshot.borrow());
        if let GuardDecision::Redirect(target) = decision {
            warn!(
                path,
                redirect_to = target.path(),
                "navigation not permitted for current stage, redirecting"
            );
            metrics::counter!("auth_guard_redirects_total", "path" => path.to_string())
                .increment(1);
            self.shared.navigator.redirect(target);
        }
        decision
    }

    /// Current settled state.
    pub fn snapshot(&self) -> SessionState {
        self.shared.snapshot.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.snapshot.subscribe()
    }

    /// Handle a timer firing under `epoch`. Stale epochs are ignored.
    async fn expire(&self, epoch: u64) {
        let mut core = self.shared.core.lock().await;
        if !core.supervisor.fired(epoch) {
            debug!(epoch, "stale session timer ignored");
            return;
        }
        warn!(
            window_secs = core.supervisor.window().as_secs(),
            "session expired before authentication completed"
        );
        let _ = self.apply(&mut core, AuthEvent::TimedOut);
    }

    /// Run one event through the state machine, execute its timer/redirect
    /// action and publish the new snapshot. An exchange request is handed
    /// back to the caller.
    fn apply(&self, core: &mut Core, event: AuthEvent) -> (Option<ExchangeRequest>, Result<()>) {
        let label = event.label();
        let previous = std::mem::take(&mut core.state);
        let from = previous.stage;
        let Transition {
            state,
            action,
            outcome,
        } = handle_event(previous, event, now_millis());
        core.state = state;

        metrics::counter!("auth_transitions_total", "event" => label).increment(1);
        match &outcome {
            Ok(()) => info!(
                event = label,
                from = from.label(),
                to = core.state.stage.label(),
                "transition applied"
            ),
            Err(AuthError::StateMismatch) => {
                warn!(event = label, "anti-forgery state mismatch on callback, rejected")
            }
            Err(AuthError::InvalidTransition(reason)) => warn!(
                event = label,
                stage = from.label(),
                reason = %reason,
                "invalid transition requested (sequencing bug)"
            ),
            Err(e) => warn!(event = label, error = %e, "transition recorded error"),
        }
        if let Err(e) = &outcome {
            metrics::counter!("auth_errors_total", "kind" => e.kind().label()).increment(1);
        }

        let mut request = None;
        match action {
            AuthAction::ArmTimeout => {
                let weak = Arc::downgrade(&self.shared);
                core.supervisor.arm(move |epoch| expire_weak(weak, epoch));
            }
            AuthAction::DisarmTimeout => core.supervisor.disarm(),
            AuthAction::RedirectToInitiation => {
                core.supervisor.disarm();
                self.shared.navigator.redirect(Route::Initiation);
            }
            AuthAction::Exchange(exchange) => request = Some(exchange),
            AuthAction::None => {}
        }

        self.shared.snapshot.send_replace(core.state.clone());
        (request, outcome)
    }
}

/// Timer callback. Holds only a weak reference so a pending timer does not
/// keep a dropped controller alive.
async fn expire_weak(shared: Weak<Shared>, epoch: u64) {
    if let Some(shared) = shared.upgrade() {
        AuthController { shared }.expire(epoch).await;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::exchange::{SimulatedExchange, TokenGrant};
    use crate::pkce::{AuthorizationParams, compute_challenge};
    use crate::state::Stage;
    use common::Secret;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    /// Navigator that records every redirect.
    #[derive(Default)]
    struct RecordingNavigator {
        redirects: StdMutex<Vec<Route>>,
    }

    impl RecordingNavigator {
        fn redirects(&self) -> Vec<Route> {
            self.redirects.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn redirect(&self, route: Route) {
            self.redirects.lock().unwrap().push(route);
        }
    }

    /// Exchange returning a fixed grant without delay.
    struct FixedExchange;

    impl TokenExchange for FixedExchange {
        fn exchange<'a>(
            &'a self,
            _code: &'a str,
            _verifier: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + 'a>> {
            Box::pin(async {
                Ok(TokenGrant {
                    access_token: Secret::new("T".into()),
                    session_id: "S".into(),
                    security_level: Some("high".into()),
                    expires_in: None,
                })
            })
        }
    }

    /// Exchange that never answers.
    struct HangingExchange;

    impl TokenExchange for HangingExchange {
        fn exchange<'a>(
            &'a self,
            _code: &'a str,
            _verifier: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    struct BrokenEntropy;

    impl EntropySource for BrokenEntropy {
        fn fill(&self, _dest: &mut [u8]) -> Result<()> {
            Err(AuthError::Initialization("secure random source unavailable".into()))
        }
    }

    fn controller_with(exchange: Arc<dyn TokenExchange>) -> (AuthController, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::default());
        let controller = AuthController::new(
            ControllerSettings::default(),
            exchange,
            navigator.clone(),
        );
        (controller, navigator)
    }

    fn controller() -> (AuthController, Arc<RecordingNavigator>) {
        controller_with(Arc::new(FixedExchange))
    }

    fn stored_state(controller: &AuthController) -> String {
        controller
            .snapshot()
            .anti_forgery_state
            .expect("initiated")
            .expose()
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn full_flow_reaches_success() {
        let (controller, _) = controller();
        controller.initiate().await.unwrap();
        controller.begin_processing().await.unwrap();
        let state = stored_state(&controller);
        controller.complete_authentication("code1", &state).await.unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.stage, Stage::Success);
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_processing);
        assert_eq!(snapshot.auth_token.as_ref().unwrap().expose(), "T");
        assert_eq!(snapshot.session_id.as_deref(), Some("S"));
        assert_eq!(snapshot.security_level, "high");
        assert!(snapshot.error.is_none());
        assert!(!snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn initiate_produces_consistent_pkce() {
        let (controller, _) = controller();
        controller.initiate().await.unwrap();
        let snapshot = controller.snapshot();
        let verifier = snapshot.pkce_verifier.unwrap();
        assert_eq!(
            snapshot.pkce_challenge.unwrap(),
            compute_challenge(verifier.expose())
        );
        assert!(snapshot.session_start_time.is_some());
        assert!(snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_state_is_rejected_without_tokens() {
        let (controller, _) = controller();
        controller.initiate().await.unwrap();
        let before = controller.snapshot();

        let err = controller
            .complete_authentication("code1", "WRONG")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::StateMismatch);

        let after = controller.snapshot();
        assert_eq!(after.error.as_ref().map(|e| e.kind), Some(ErrorKind::StateMismatch));
        assert!(!after.is_authenticated);
        assert!(after.auth_token.is_none());
        assert!(after.session_id.is_none());
        assert_eq!(SessionState { error: None, ..after }, before);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_is_recorded() {
        let navigator = Arc::new(RecordingNavigator::default());
        let controller = AuthController::with_entropy(
            ControllerSettings::default(),
            Arc::new(BrokenEntropy),
            Arc::new(FixedExchange),
            navigator,
        );

        let err = controller.initiate().await.unwrap_err();
        assert!(matches!(err, AuthError::Initialization(_)));
        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.error.map(|e| e.kind),
            Some(ErrorKind::InitializationError)
        );
        assert!(snapshot.pkce_verifier.is_none());
        assert!(!snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_exchange_keeps_stage_and_records_error() {
        let exchange = SimulatedExchange::new()
            .with_latency(Duration::from_millis(50))
            .failing("provider returned 503");
        let (controller, _) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        controller.begin_processing().await.unwrap();
        let state = stored_state(&controller);

        let err = controller
            .complete_authentication("code1", &state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExchangeError);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.stage, Stage::Processing);
        assert!(!snapshot.is_processing);
        assert!(snapshot.auth_token.is_none());

        // Retrying with the same callback is allowed after a failed exchange.
        assert!(controller.complete_authentication("code1", &state).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_exchange_times_out() {
        let navigator = Arc::new(RecordingNavigator::default());
        let controller = AuthController::new(
            ControllerSettings {
                exchange_timeout: Duration::from_secs(5),
                ..ControllerSettings::default()
            },
            Arc::new(HangingExchange),
            navigator,
        );
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);

        let err = controller
            .complete_authentication("code1", &state)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Exchange("no response within 5s".into()));
        assert!(!controller.snapshot().is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_publishes_busy_signal() {
        let exchange = SimulatedExchange::new().with_latency(Duration::from_secs(2));
        let (controller, _) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        controller.begin_processing().await.unwrap();
        let state = stored_state(&controller);
        let mut updates = controller.subscribe();
        updates.borrow_and_update();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.complete_authentication("code1", &state).await })
        };

        updates.changed().await.unwrap();
        {
            let busy = updates.borrow_and_update();
            assert!(busy.is_processing, "exchange in flight must publish is_processing");
            assert!(busy.auth_token.is_none());
        }

        task.await.unwrap().unwrap();
        assert!(controller.snapshot().is_authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_everything_and_redirects() {
        let (controller, navigator) = controller();
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);
        controller.complete_authentication("code1", &state).await.unwrap();

        controller.reset().await;
        assert_eq!(controller.snapshot(), SessionState::initial());
        assert_eq!(navigator.redirects(), vec![Route::Initiation]);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_session_times_out_once() {
        let (controller, navigator) = controller();
        controller.initiate().await.unwrap();

        tokio::time::sleep(WINDOW - Duration::from_secs(1)).await;
        assert!(controller.snapshot().error.is_none(), "must not expire early");

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::SessionTimeout)
        );
        assert_eq!(SessionState { error: None, ..snapshot }, SessionState::initial());
        assert_eq!(navigator.redirects(), vec![Route::Initiation]);

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(navigator.redirects().len(), 1, "timer fires exactly once");
    }

    #[tokio::test(start_paused = true)]
    async fn activity_does_not_extend_window() {
        let (controller, _) = controller();
        controller.initiate().await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        controller.record_activity().await;
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(
            controller.snapshot().error.map(|e| e.kind),
            Some(ErrorKind::SessionTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reinitiate_prevents_old_timer_from_firing() {
        let (controller, navigator) = controller();
        controller.initiate().await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        controller.initiate().await.unwrap();
        let second_state = stored_state(&controller);

        // First session's deadline passes.
        tokio::time::sleep(Duration::from_secs(400)).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.error.is_none(), "stale timer must not reset the new session");
        assert_eq!(stored_state(&controller), second_state);
        assert!(navigator.redirects().is_empty());

        // Second session's deadline passes.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(
            controller.snapshot().error.map(|e| e.kind),
            Some(ErrorKind::SessionTimeout)
        );
        assert_eq!(navigator.redirects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_disarms_timeout() {
        let (controller, navigator) = controller();
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);
        controller.complete_authentication("code1", &state).await.unwrap();

        tokio::time::sleep(WINDOW * 2).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(snapshot.error.is_none());
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_processing_after_success_is_rejected() {
        let (controller, _) = controller();
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);
        controller.complete_authentication("code1", &state).await.unwrap();

        let err = controller.begin_processing().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidTransition(_)));
        assert!(controller.snapshot().is_authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_is_guarded_by_stage() {
        let (controller, navigator) = controller();

        assert_eq!(
            controller.navigate("/authentication-processing"),
            GuardDecision::Redirect(Route::Initiation)
        );
        assert_eq!(
            controller.navigate("/authentication-success-dashboard"),
            GuardDecision::Redirect(Route::Initiation)
        );
        assert_eq!(navigator.redirects().len(), 2);

        controller.initiate().await.unwrap();
        assert_eq!(
            controller.navigate("/authentication-processing"),
            GuardDecision::Allow(Route::Processing)
        );

        let state = stored_state(&controller);
        controller.complete_authentication("code1", &state).await.unwrap();
        assert_eq!(
            controller.navigate("/authentication-success-dashboard"),
            GuardDecision::Allow(Route::SuccessDashboard)
        );
        assert_eq!(navigator.redirects().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn initiate_returns_minted_request() {
        let (controller, _) = controller();
        let request = controller.initiate().await.unwrap();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.pkce_challenge.as_ref(), Some(&request.challenge));
        assert_eq!(request.state.expose(), &stored_state(&controller));

        // The request stays valid for building the URL even after the
        // session it came from has been replaced.
        controller.reset().await;
        let url = request.url(&AuthorizationParams {
            authorize_endpoint: "https://auth.example-bank.my/oauth/authorize".into(),
            client_id: "silent-auth-web".into(),
            redirect_uri: "http://127.0.0.1:8080/auth/callback".into(),
            scopes: "openid".into(),
        });
        assert!(url.contains(&format!("code_challenge={}", request.challenge)));
        assert!(url.contains(&format!("state={}", request.state.expose())));

        let second = controller.initiate().await.unwrap();
        assert_ne!(second.state, request.state);
        assert_ne!(second.challenge, request.challenge);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_callback_still_records_success() {
        let exchange = SimulatedExchange::new().with_latency(Duration::from_secs(2));
        let (controller, _) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        controller.begin_processing().await.unwrap();
        let state = stored_state(&controller);

        let caller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.complete_authentication("code1", &state).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snapshot = controller.snapshot();
        assert!(!snapshot.is_processing, "busy signal must not outlive the exchange");
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.stage, Stage::Success);
        assert!(!snapshot.timeout_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_callback_still_records_failure() {
        let exchange = SimulatedExchange::new()
            .with_latency(Duration::from_secs(2))
            .failing("provider returned 503");
        let (controller, _) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        controller.begin_processing().await.unwrap();
        let state = stored_state(&controller);

        let caller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.complete_authentication("code1", &state).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snapshot = controller.snapshot();
        assert!(!snapshot.is_processing);
        assert_eq!(
            snapshot.error.map(|e| e.kind),
            Some(ErrorKind::AuthExchangeError)
        );
        assert_eq!(snapshot.stage, Stage::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_during_successful_exchange_never_fires() {
        let exchange = SimulatedExchange::new().with_latency(Duration::from_secs(2));
        let (controller, navigator) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);

        // The exchange holds the lock across the 900 s deadline.
        tokio::time::sleep(WINDOW - Duration::from_secs(1)).await;
        controller.complete_authentication("code1", &state).await.unwrap();

        tokio::time::sleep(WINDOW * 2).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.timeout_armed);
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_during_failed_exchange_fires_once_after_it() {
        let exchange = SimulatedExchange::new()
            .with_latency(Duration::from_secs(2))
            .failing("provider returned 503");
        let (controller, navigator) = controller_with(Arc::new(exchange));
        controller.initiate().await.unwrap();
        let state = stored_state(&controller);

        tokio::time::sleep(WINDOW - Duration::from_secs(1)).await;
        let err = controller
            .complete_authentication("code1", &state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExchangeError);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::SessionTimeout)
        );
        assert_eq!(SessionState { error: None, ..snapshot }, SessionState::initial());
        assert_eq!(navigator.redirects(), vec![Route::Initiation]);

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(navigator.redirects().len(), 1, "timer fires exactly once");
    }
}
