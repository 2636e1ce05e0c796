//! In-memory identity provider and session helpers for tests.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for downstream crates.

use crate::{
    AuthChallenge, AuthError, AuthResult, ChallengeKind, Identity, IdentityClient, LoginStep,
    ProviderTokens, Session, SignupAck,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Temporary password every provisioned account starts with.
pub const TEMPORARY_CREDENTIAL: &str = "Temporary1";

/// Build an unsigned JWT carrying `claims`.
pub fn unsigned_jwt(claims: &Value) -> String {
    format!(
        "{}.{}.unsigned",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// A session for `login_id` expiring `ttl` from now (negative for expired).
pub fn session_for(login_id: &str, roles: &[&str], ttl: chrono::Duration) -> Session {
    let expires_at = Utc::now() + ttl;
    Session {
        token: unsigned_jwt(&json!({
            "email": login_id,
            "exp": expires_at.timestamp(),
            "cognito:groups": roles,
        })),
        expires_at,
        identity: Identity {
            login_id: login_id.to_string(),
            subject: Some(format!("sub-{}", login_id)),
            roles: roles.iter().map(|role| role.to_string()).collect(),
        },
        access_token: Some(format!("access-{}", login_id)),
        refresh_token: Some(format!("refresh-{}", login_id)),
    }
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    roles: Vec<String>,
    must_rotate: bool,
}

/// Scriptable in-memory [`IdentityClient`] with call counters.
pub struct FakeIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    refresh_tokens: Mutex<HashMap<String, String>>,
    token_ttl: Mutex<chrono::Duration>,
    login_delay: Mutex<Duration>,
    refresh_delay: Mutex<Duration>,
    fail_refresh: Mutex<Option<AuthError>>,
    fail_sign_out: AtomicBool,
    issued: AtomicUsize,
    login_calls: AtomicUsize,
    challenge_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    registration_calls: AtomicUsize,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            refresh_tokens: Mutex::new(HashMap::new()),
            token_ttl: Mutex::new(chrono::Duration::hours(1)),
            login_delay: Mutex::new(Duration::ZERO),
            refresh_delay: Mutex::new(Duration::ZERO),
            fail_refresh: Mutex::new(None),
            fail_sign_out: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            challenge_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            registration_calls: AtomicUsize::new(0),
        }
    }

    /// Add an active account that logs in without a challenge.
    pub fn with_account(self, login_id: &str, password: &str, roles: &[&str]) -> Self {
        self.accounts.lock().insert(
            login_id.to_string(),
            Account {
                password: password.to_string(),
                roles: roles.iter().map(|role| role.to_string()).collect(),
                must_rotate: false,
            },
        );
        self
    }

    /// Lifetime of issued id tokens.
    pub fn set_token_ttl(&self, ttl: chrono::Duration) {
        *self.token_ttl.lock() = ttl;
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock() = delay;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_fail_refresh(&self, error: Option<AuthError>) {
        *self.fail_refresh.lock() = error;
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Mint a refresh credential for an existing account, as if it had been
    /// persisted by an earlier run.
    pub fn issue_refresh_token(&self, login_id: &str) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("refresh-{}-{}", login_id, n);
        self.refresh_tokens
            .lock()
            .insert(token.clone(), login_id.to_string());
        token
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn challenge_calls(&self) -> usize {
        self.challenge_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn registration_calls(&self) -> usize {
        self.registration_calls.load(Ordering::SeqCst)
    }

    fn tokens_for(&self, login_id: &str, roles: &[String], with_refresh: bool) -> ProviderTokens {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let ttl = *self.token_ttl.lock();
        let id_token = unsigned_jwt(&json!({
            "sub": format!("sub-{}", login_id),
            "email": login_id,
            "exp": (Utc::now() + ttl).timestamp(),
            "cognito:groups": roles,
            "jti": n,
        }));

        let refresh_token = with_refresh.then(|| {
            let token = format!("refresh-{}-{}", login_id, n);
            self.refresh_tokens
                .lock()
                .insert(token.clone(), login_id.to_string());
            token
        });

        ProviderTokens {
            id_token,
            access_token: Some(format!("access-{}-{}", login_id, n)),
            refresh_token,
            expires_in: ttl.num_seconds(),
        }
    }

    async fn pause(delay: &Mutex<Duration>) {
        let delay = *delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl IdentityClient for FakeIdentityProvider {
    async fn initiate_login(&self, login_id: &str, credential: &str) -> AuthResult<LoginStep> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.login_delay).await;

        let account = self
            .accounts
            .lock()
            .get(login_id)
            .cloned()
            .filter(|account| account.password == credential)
            .ok_or(AuthError::InvalidCredentials)?;

        if account.must_rotate {
            return Ok(LoginStep::NewCredentialRequired(AuthChallenge {
                kind: ChallengeKind::NewCredentialRequired,
                pending_identity_hint: login_id.to_string(),
                provider_session: format!("challenge-{}", login_id),
            }));
        }

        Ok(LoginStep::Complete(self.tokens_for(login_id, &account.roles, true)))
    }

    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        new_credential: &str,
    ) -> AuthResult<ProviderTokens> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.login_delay).await;

        let login_id = &challenge.pending_identity_hint;
        if challenge.provider_session != format!("challenge-{}", login_id) {
            return Err(AuthError::InvalidCredentials);
        }

        let roles = {
            let mut accounts = self.accounts.lock();
            let account = accounts
                .get_mut(login_id)
                .filter(|account| account.must_rotate)
                .ok_or(AuthError::InvalidCredentials)?;
            account.password = new_credential.to_string();
            account.must_rotate = false;
            account.roles.clone()
        };

        Ok(self.tokens_for(login_id, &roles, true))
    }

    async fn initiate_registration(&self, login_id: &str) -> AuthResult<SignupAck> {
        self.registration_calls.fetch_add(1, Ordering::SeqCst);

        let mut accounts = self.accounts.lock();
        if accounts.contains_key(login_id) {
            return Err(AuthError::AlreadyExists);
        }
        accounts.insert(
            login_id.to_string(),
            Account {
                password: TEMPORARY_CREDENTIAL.to_string(),
                roles: Vec::new(),
                must_rotate: true,
            },
        );

        Ok(SignupAck {
            message: "User created successfully".to_string(),
            identity_ref: login_id.to_string(),
        })
    }

    async fn confirm_registration(&self, login_id: &str, _code: &str) -> AuthResult<()> {
        if self.accounts.lock().contains_key(login_id) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn resend_code(&self, login_id: &str) -> AuthResult<()> {
        self.confirm_registration(login_id, "").await
    }

    async fn sign_out(&self, session: &Session) -> AuthResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkError("sign-out endpoint unreachable".to_string()));
        }
        let login_id = &session.identity.login_id;
        self.refresh_tokens.lock().retain(|_, owner| owner != login_id);
        Ok(())
    }

    async fn fetch_current_identity(&self, session: &Session) -> AuthResult<Identity> {
        if !self.accounts.lock().contains_key(&session.identity.login_id) {
            return Err(AuthError::SessionExpired);
        }
        Ok(session.identity.clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<ProviderTokens> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.refresh_delay).await;

        if let Some(error) = self.fail_refresh.lock().clone() {
            return Err(error);
        }

        let login_id = self
            .refresh_tokens
            .lock()
            .get(refresh_token)
            .cloned()
            .ok_or(AuthError::SessionExpired)?;
        let roles = self
            .accounts
            .lock()
            .get(&login_id)
            .map(|account| account.roles.clone())
            .ok_or(AuthError::SessionExpired)?;

        Ok(self.tokens_for(&login_id, &roles, false))
    }
}
