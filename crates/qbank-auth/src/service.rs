//! The session controller.
//!
//! `AuthService` owns the auth state machine, the pending challenge and the
//! session cache. It is constructed explicitly and cloned cheaply; clones
//! share the same state.
//!
//! Login and challenge completion run on spawned tasks while holding the
//! operation guard. A caller that drops its future does not cancel the remote
//! call: the outcome is still applied to the state machine, it just has
//! nobody to be returned to.

use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthState, AuthStateChangedPayload};
use crate::authorization::{Action, AuthorizationGate};
use crate::identity::{AuthChallenge, IdentityClient, LoginStep, Session, SignupAck, TokenProvider};
use crate::session_cache::SessionCache;
use crate::validation::{normalize_login_id, require_credential, validate_new_credential};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use qbank_config::{Config, DEFAULT_REFRESH_MARGIN_SECS, DEFAULT_RESUME_TIMEOUT_SECS};
use qbank_credential_store::CredentialStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback type for auth state change notifications.
pub type AuthStateCallback = Box<dyn Fn(AuthStateChangedPayload) + Send + Sync>;

/// Timing knobs for the controller.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Refresh tokens this close to expiry before handing them out.
    pub refresh_margin: Duration,
    /// Upper bound for the silent resume in [`AuthService::start`].
    pub resume_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
            resume_timeout: Duration::from_secs(DEFAULT_RESUME_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for AuthConfig {
    fn from(config: &Config) -> Self {
        Self {
            refresh_margin: config.refresh_margin(),
            resume_timeout: config.resume_timeout(),
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub login_id: Option<String>,
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub challenge_pending: bool,
}

struct AuthInner {
    identity: Arc<dyn IdentityClient>,
    credentials: Option<CredentialStore>,
    config: AuthConfig,
    fsm: Mutex<AuthMachine>,
    /// Present exactly while the machine is in `ChallengeRequired`.
    challenge: Mutex<Option<AuthChallenge>>,
    cache: SessionCache,
    /// Held for the whole of resume, login and challenge completion.
    operation: Arc<tokio::sync::Mutex<()>>,
    callbacks: Mutex<Vec<AuthStateCallback>>,
}

/// Session and authorization controller.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<AuthInner>,
}

impl AuthService {
    /// Create a controller without credential persistence.
    pub fn new(identity: Arc<dyn IdentityClient>, config: AuthConfig) -> Self {
        Self::build(identity, config, None)
    }

    /// Create a controller that persists the refresh credential so later
    /// runs can resume silently.
    pub fn with_credential_store(
        identity: Arc<dyn IdentityClient>,
        config: AuthConfig,
        credentials: CredentialStore,
    ) -> Self {
        Self::build(identity, config, Some(credentials))
    }

    fn build(
        identity: Arc<dyn IdentityClient>,
        config: AuthConfig,
        credentials: Option<CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                identity,
                credentials,
                cache: SessionCache::new(config.refresh_margin),
                config,
                fsm: Mutex::new(AuthMachine::new()),
                challenge: Mutex::new(None),
                operation: Arc::new(tokio::sync::Mutex::new(())),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a state change callback.
    ///
    /// Callbacks run synchronously after the transition; they may read the
    /// service but must not register further callbacks.
    pub fn subscribe(&self, callback: AuthStateCallback) {
        self.inner.callbacks.lock().push(callback);
    }

    /// Attempt a silent resume from persisted credentials.
    ///
    /// Bounded by the configured resume timeout. Any failure settles in
    /// `Unauthenticated`; only an explicit rejection by the provider discards
    /// the persisted credential.
    pub async fn start(&self) -> AuthResult<AuthState> {
        let _guard = Arc::clone(&self.inner.operation).lock_owned().await;

        let Some(store) = self.inner.credentials.as_ref() else {
            return Ok(self.state());
        };
        let refresh_token = match store.get_refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No persisted session to resume");
                return Ok(self.state());
            }
            Err(err) => {
                warn!(error = %err, "Could not read persisted session");
                return Ok(self.state());
            }
        };
        let login_hint = store
            .get_session_meta()
            .ok()
            .flatten()
            .map(|meta| meta.login_id);

        self.inner.transition(&AuthMachineInput::ResumeAttempt)?;

        let inner = Arc::clone(&self.inner);
        let mut resume_task = tokio::spawn(async move { inner.resume(login_hint, refresh_token).await });
        let outcome = match tokio::time::timeout(self.inner.config.resume_timeout, &mut resume_task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(AuthError::Internal(format!("Resume task failed: {}", join_err))),
            Err(_) => {
                resume_task.abort();
                Err(AuthError::Timeout)
            }
        };

        match outcome {
            Ok(session) => {
                let login_id = session.identity.login_id.clone();
                self.inner
                    .transition_with(&AuthMachineInput::SessionResumed, || {
                        self.inner.cache.store(session.clone());
                        self.inner.persist(&session);
                    })?;
                info!(login_id = %login_id, "Session resumed");
            }
            Err(err) => {
                warn!(error = %err, "Session resume failed");
                if !err.is_transient() {
                    self.inner.clear_persisted();
                }
                self.inner.transition(&AuthMachineInput::NoSession)?;
            }
        }

        Ok(self.state())
    }

    /// Drop in-memory state and callbacks. Persisted credentials are kept so
    /// the next start can resume.
    pub fn shutdown(&self) {
        self.inner.callbacks.lock().clear();
        if let Err(err) = self.inner.transition_with(&AuthMachineInput::LogoutRequested, || {
            self.inner.challenge.lock().take();
            self.inner.cache.clear();
        }) {
            warn!(error = %err, "Shutdown transition rejected");
            self.inner.challenge.lock().take();
            self.inner.cache.clear();
        }
        debug!("Auth service shut down");
    }

    /// Sign in with a login id and password.
    ///
    /// Fails with `ChallengeRequired` (and no session) when the provider
    /// demands a new password; follow up with [`Self::complete_challenge`].
    pub async fn login(&self, login_id: &str, credential: &str) -> AuthResult<Session> {
        let login_id = normalize_login_id(login_id)?;
        require_credential(credential)?;

        let guard = Arc::clone(&self.inner.operation)
            .try_lock_owned()
            .map_err(|_| AuthError::OperationInProgress)?;

        if !self.state().accepts_login() {
            return Err(AuthError::InvalidStateTransition(format!(
                "Cannot log in while {}",
                self.state()
            )));
        }
        self.inner.transition(&AuthMachineInput::LoginAttempt)?;
        debug!(login_id = %login_id, "Attempting login");

        let inner = Arc::clone(&self.inner);
        let credential = credential.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = inner.identity.initiate_login(&login_id, &credential).await;
            inner.settle_authentication(&login_id, outcome)
        });

        task.await
            .map_err(|err| AuthError::Internal(format!("Login task failed: {}", err)))?
    }

    /// Answer the pending new-password challenge.
    ///
    /// Without a pending challenge this fails with `NoActiveChallenge` and
    /// changes nothing. A new password that breaks the policy is rejected
    /// before the challenge is consumed. Once submitted, the challenge is
    /// gone whatever the provider answers.
    pub async fn complete_challenge(&self, new_credential: &str) -> AuthResult<Session> {
        let guard = Arc::clone(&self.inner.operation)
            .try_lock_owned()
            .map_err(|_| AuthError::OperationInProgress)?;

        if self.inner.challenge.lock().is_none() {
            return Err(AuthError::NoActiveChallenge);
        }
        validate_new_credential(new_credential)?;

        let mut submitted = None;
        self.inner
            .transition_with(&AuthMachineInput::ChallengeSubmitted, || {
                submitted = self.inner.challenge.lock().take();
            })
            .map_err(|_| AuthError::NoActiveChallenge)?;
        let Some(challenge) = submitted else {
            self.inner.fail_authentication(&AuthError::NoActiveChallenge);
            return Err(AuthError::NoActiveChallenge);
        };
        debug!(login_id = %challenge.pending_identity_hint, "Submitting new credential");

        let inner = Arc::clone(&self.inner);
        let new_credential = new_credential.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = inner
                .identity
                .respond_to_challenge(&challenge, &new_credential)
                .await
                .map(LoginStep::Complete);
            inner.settle_authentication(&challenge.pending_identity_hint, outcome)
        });

        task.await
            .map_err(|err| AuthError::Internal(format!("Challenge task failed: {}", err)))?
    }

    /// Discard the pending challenge and return to `Unauthenticated`.
    pub fn abandon_challenge(&self) -> AuthResult<()> {
        if self.inner.challenge.lock().is_none() {
            return Err(AuthError::NoActiveChallenge);
        }
        self.inner
            .transition_with(&AuthMachineInput::ChallengeAbandoned, || {
                self.inner.challenge.lock().take();
            })?;
        info!("Pending challenge abandoned");
        Ok(())
    }

    /// Provision an identity. The provider emails a temporary password that
    /// must be rotated on first login. Never touches the current session.
    pub async fn signup(&self, login_id: &str) -> AuthResult<SignupAck> {
        let login_id = normalize_login_id(login_id)?;
        let ack = self.inner.identity.initiate_registration(&login_id).await?;
        info!(login_id = %login_id, "Identity provisioned");
        Ok(ack)
    }

    /// Sign out. Local state is always cleared; a failing remote sign-out is
    /// only logged.
    pub async fn logout(&self) {
        let mut previous = None;
        if let Err(err) = self.inner.transition_with(&AuthMachineInput::LogoutRequested, || {
            self.inner.challenge.lock().take();
            previous = self.inner.cache.clear();
            self.inner.clear_persisted();
        }) {
            // Unreachable with the current machine; clear anyway.
            warn!(error = %err, "Logout transition rejected");
            self.inner.challenge.lock().take();
            previous = self.inner.cache.clear();
            self.inner.clear_persisted();
        }

        let Some(session) = previous else {
            debug!("Logout without a session");
            return;
        };
        let login_id = session.identity.login_id.clone();
        match self.inner.identity.sign_out(&session).await {
            Ok(()) => info!(login_id = %login_id, "Logged out"),
            Err(err) => warn!(login_id = %login_id, error = %err, "Remote sign-out failed"),
        }
    }

    /// Current valid token, refreshed when near expiry.
    ///
    /// Returns `None` when signed out or when the refresh failed; in the
    /// latter case the controller is `Unauthenticated` afterwards.
    pub async fn get_token(&self) -> Option<String> {
        self.try_get_token().await.unwrap_or_else(|err| {
            debug!(error = %err, "No token available");
            None
        })
    }

    /// Like [`Self::get_token`] but surfaces the refresh error.
    pub async fn try_get_token(&self) -> AuthResult<Option<String>> {
        let refresher = Arc::clone(&self.inner);
        let persister = Arc::clone(&self.inner);

        let result = self
            .inner
            .cache
            .get(
                move |stale| refresher.refresh(stale),
                move |fresh| persister.persist(fresh),
            )
            .await;

        match result {
            Ok(session) => Ok(session.map(|session| session.token)),
            Err(err) => {
                self.inner.expire_session(&err);
                Err(err)
            }
        }
    }

    /// Held session if it has not expired. Does not refresh.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.cache.peek()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state()
    }

    pub fn status(&self) -> AuthSnapshot {
        let session = self.current_session();
        AuthSnapshot {
            state: self.state(),
            login_id: session.as_ref().map(|s| s.identity.login_id.clone()),
            roles: session
                .as_ref()
                .map(|s| s.identity.roles.iter().cloned().collect())
                .unwrap_or_default(),
            is_admin: AuthorizationGate::is_admin(session.as_ref()),
            expires_at: session.as_ref().map(|s| s.expires_at),
            challenge_pending: self.inner.challenge.lock().is_some(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        AuthorizationGate::has_role(self.current_session().as_ref(), role)
    }

    pub fn is_admin(&self) -> bool {
        AuthorizationGate::is_admin(self.current_session().as_ref())
    }

    /// Whether `action` should be offered to the current session.
    pub fn can(&self, action: Action) -> bool {
        AuthorizationGate::can(self.current_session().as_ref(), action)
    }
}

#[async_trait]
impl TokenProvider for AuthService {
    async fn bearer_token(&self) -> Option<String> {
        self.get_token().await
    }

    /// Only the session that owns `rejected_token` is dropped. A rejection
    /// that arrives after logout or a new login leaves the current session
    /// alone.
    fn invalidate_session(&self, rejected_token: &str) {
        let result = self.inner.transition_if(
            &AuthMachineInput::SessionInvalidated,
            |state| state.is_authenticated() && self.inner.cache.holds_token(rejected_token),
            || {
                self.inner.cache.clear();
                self.inner.clear_persisted();
            },
        );
        match result {
            Ok(Some(_)) => info!("Session invalidated by API"),
            Ok(None) => debug!("Ignoring rejection of a token that is no longer current"),
            Err(err) => warn!(error = %err, "Session invalidation rejected"),
        }
    }
}

impl AuthInner {
    fn state(&self) -> AuthState {
        AuthState::from(self.fsm.lock().state())
    }

    fn transition(&self, input: &AuthMachineInput) -> AuthResult<AuthState> {
        self.transition_with(input, || {})
    }

    /// Apply `input` and run `effect` under the machine lock, so observers
    /// never see the new state without its data.
    fn transition_with(&self, input: &AuthMachineInput, effect: impl FnOnce()) -> AuthResult<AuthState> {
        self.transition_if(input, |_| true, effect)
            .map(|state| state.unwrap_or_else(|| self.state()))
    }

    /// Like `transition_with`, but a false `precondition` leaves the machine
    /// alone and returns `Ok(None)`.
    fn transition_if(
        &self,
        input: &AuthMachineInput,
        precondition: impl FnOnce(AuthState) -> bool,
        effect: impl FnOnce(),
    ) -> AuthResult<Option<AuthState>> {
        let mut fsm = self.fsm.lock();
        let old_state = AuthState::from(fsm.state());
        if !precondition(old_state) {
            return Ok(None);
        }

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;
        effect();

        let new_state = AuthState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = %old_state,
                new_state = %new_state,
                "Auth state transition"
            );
            self.notify_state_change(new_state);
        }

        Ok(Some(new_state))
    }

    fn notify_state_change(&self, state: AuthState) {
        let session = self.cache.peek_any();
        let payload = AuthStateChangedPayload {
            state,
            login_id: session.as_ref().map(|s| s.identity.login_id.clone()),
            is_admin: AuthorizationGate::is_admin(session.as_ref()),
        };

        for callback in self.callbacks.lock().iter() {
            callback(payload.clone());
        }
    }

    /// Apply a login or challenge outcome. If the machine moved on while the
    /// call was in flight (logout), the outcome is discarded.
    fn settle_authentication(&self, login_hint: &str, outcome: AuthResult<LoginStep>) -> AuthResult<Session> {
        match outcome {
            Ok(LoginStep::Complete(tokens)) => {
                let session = match Session::from_tokens(tokens, Some(login_hint), None) {
                    Ok(session) => session,
                    Err(err) => {
                        self.fail_authentication(&err);
                        return Err(err);
                    }
                };

                // Persisted under the machine lock, ordered against logout.
                self.transition_with(&AuthMachineInput::LoginSucceeded, || {
                    self.cache.store(session.clone());
                    self.persist(&session);
                })
                .inspect_err(|_| debug!(login_id = %login_hint, "Discarding superseded login result"))?;
                info!(
                    login_id = %session.identity.login_id,
                    roles = ?session.identity.roles,
                    "Login successful"
                );
                Ok(session)
            }
            Ok(LoginStep::NewCredentialRequired(challenge)) => {
                self.transition_with(&AuthMachineInput::ChallengeIssued, || {
                    *self.challenge.lock() = Some(challenge);
                })
                .inspect_err(|_| debug!(login_id = %login_hint, "Discarding superseded challenge"))?;

                info!(login_id = %login_hint, "New password required");
                Err(AuthError::ChallengeRequired)
            }
            Err(err) => {
                self.fail_authentication(&err);
                Err(err)
            }
        }
    }

    fn fail_authentication(&self, err: &AuthError) {
        warn!(error = %err, "Authentication failed");
        if let Err(transition_err) = self.transition(&AuthMachineInput::LoginFailed) {
            debug!(error = %transition_err, "Login failure arrived after state changed");
        }
    }

    async fn resume(&self, login_hint: Option<String>, refresh_token: String) -> AuthResult<Session> {
        let session = self
            .identity
            .fetch_session(login_hint.as_deref(), &refresh_token)
            .await?;
        let verified = self.identity.fetch_current_identity(&session).await?;

        if verified.login_id != session.identity.login_id {
            warn!(
                expected = %session.identity.login_id,
                actual = %verified.login_id,
                "Provider returned a different identity"
            );
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    async fn refresh(self: Arc<Self>, stale: Session) -> AuthResult<Session> {
        let Some(refresh_token) = stale.refresh_token.clone() else {
            debug!(login_id = %stale.identity.login_id, "Session has no refresh credential");
            return Err(AuthError::SessionExpired);
        };

        debug!(login_id = %stale.identity.login_id, "Refreshing session");
        self.identity
            .fetch_session(Some(&stale.identity.login_id), &refresh_token)
            .await
    }

    /// A refresh failed. Unless a newer session already replaced the failed
    /// one, drop to `Unauthenticated`.
    fn expire_session(&self, err: &AuthError) {
        warn!(error = %err, "Session refresh failed");

        let result = self.transition_if(
            &AuthMachineInput::SessionInvalidated,
            |state| state.is_authenticated() && self.cache.is_empty(),
            || {},
        );
        if let Err(transition_err) = result {
            debug!(error = %transition_err, "Refresh failure arrived after state changed");
        }
        if !err.is_transient() && self.cache.is_empty() {
            self.clear_persisted();
        }
    }

    fn persist(&self, session: &Session) {
        let (Some(store), Some(refresh_token)) = (&self.credentials, &session.refresh_token) else {
            return;
        };
        if let Err(err) = store.set_session(&session.identity.login_id, refresh_token, session.expires_at) {
            warn!(error = %err, "Failed to persist session");
        }
    }

    fn clear_persisted(&self) {
        if let Some(store) = &self.credentials {
            if let Err(err) = store.clear_session() {
                warn!(error = %err, "Failed to clear persisted session");
            }
        }
    }
}
