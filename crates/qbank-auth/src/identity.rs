//! Identity provider contract and the values that flow through it.

use crate::claims::TokenClaims;
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Trimmed, lowercased email.
    pub login_id: String,
    /// Provider subject id, when known.
    pub subject: Option<String>,
    /// Role claims (provider groups).
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Raw token set returned by the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Lifetime of the id token in seconds.
    pub expires_in: i64,
}

impl fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// An authenticated context usable to authorize API calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer token presented to the question API (the id token).
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
    /// Provider access token, needed for sign-out and identity lookups.
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    /// Build a session from provider tokens.
    ///
    /// Expiry is the earlier of `expires_in` and the token's own `exp`.
    /// `previous_refresh` is kept when the provider does not rotate the
    /// refresh token.
    pub fn from_tokens(
        tokens: ProviderTokens,
        login_hint: Option<&str>,
        previous_refresh: Option<String>,
    ) -> AuthResult<Self> {
        let claims = TokenClaims::decode(&tokens.id_token);
        let now = Utc::now();

        let by_lifetime = now + Duration::seconds(tokens.expires_in.max(0));
        let expires_at = match claims.expires_at() {
            Some(exp) => exp.min(by_lifetime),
            None => by_lifetime,
        };
        if expires_at <= now {
            return Err(AuthError::SessionExpired);
        }

        let login_id = claims
            .login_id()
            .or(login_hint)
            .map(|id| id.trim().to_lowercase())
            .ok_or_else(|| AuthError::Provider("Token carries no login id".to_string()))?;

        Ok(Self {
            token: tokens.id_token,
            expires_at,
            identity: Identity {
                login_id,
                subject: claims.sub.clone(),
                roles: claims.groups.into_iter().collect(),
            },
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(previous_refresh),
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// True once the session is within `margin` of expiry.
    pub fn needs_refresh(&self, margin: std::time::Duration) -> bool {
        let margin = Duration::from_std(margin).unwrap_or_else(|_| Duration::zero());
        Utc::now() + margin >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("login_id", &self.identity.login_id)
            .field("roles", &self.identity.roles)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Administratively provisioned account logging in with its temporary password.
    NewCredentialRequired,
}

/// Extra step the provider interposes between login and session issuance.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub kind: ChallengeKind,
    /// Login id the challenge was issued for.
    pub pending_identity_hint: String,
    /// Opaque provider continuation handle.
    pub provider_session: String,
}

impl fmt::Debug for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthChallenge")
            .field("kind", &self.kind)
            .field("pending_identity_hint", &self.pending_identity_hint)
            .finish_non_exhaustive()
    }
}

/// Outcome of the first login step.
#[derive(Debug, Clone)]
pub enum LoginStep {
    Complete(ProviderTokens),
    NewCredentialRequired(AuthChallenge),
}

/// Acknowledgement of an administrative signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupAck {
    pub message: String,
    pub identity_ref: String,
}

/// Primitives offered by the identity provider.
///
/// Implementations map provider failures onto [`AuthError`]: bad credentials
/// of any kind become `InvalidCredentials`, duplicates become `AlreadyExists`
/// and transport failures become `NetworkError` or `Timeout`.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn initiate_login(&self, login_id: &str, credential: &str) -> AuthResult<LoginStep>;

    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        new_credential: &str,
    ) -> AuthResult<ProviderTokens>;

    /// Provision an identity. The provider emails a temporary password.
    async fn initiate_registration(&self, login_id: &str) -> AuthResult<SignupAck>;

    /// Confirm a self-registered identity with the emailed code.
    async fn confirm_registration(&self, login_id: &str, code: &str) -> AuthResult<()>;

    async fn resend_code(&self, login_id: &str) -> AuthResult<()>;

    /// Revoke the session's tokens at the provider.
    async fn sign_out(&self, session: &Session) -> AuthResult<()>;

    /// Ask the provider who the session belongs to. Roles are carried over
    /// from the session's claims.
    async fn fetch_current_identity(&self, session: &Session) -> AuthResult<Identity>;

    /// Exchange a refresh credential for fresh tokens. A rejected refresh
    /// credential is `SessionExpired`.
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<ProviderTokens>;

    /// Build a full session from a refresh credential.
    async fn fetch_session(
        &self,
        login_hint: Option<&str>,
        refresh_token: &str,
    ) -> AuthResult<Session> {
        let tokens = self.refresh_session(refresh_token).await?;
        Session::from_tokens(tokens, login_hint, Some(refresh_token.to_string()))
    }
}

/// Source of bearer tokens for outbound API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current valid token, refreshed if near expiry. `None` when signed out.
    async fn bearer_token(&self) -> Option<String>;

    /// The API rejected `rejected_token`: drop the session if it still owns it.
    fn invalidate_session(&self, rejected_token: &str);
}
