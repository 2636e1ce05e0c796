//! HTTP client for the identity provider's JSON protocol.
//!
//! Every call is a `POST` to the provider endpoint with the operation named
//! in `X-Amz-Target`. Errors come back as `{"__type": ..., "message": ...}`.
//! Registration is admin provisioning and goes through the question API's
//! `/signup` endpoint instead.

use crate::identity::{
    AuthChallenge, ChallengeKind, Identity, IdentityClient, LoginStep, ProviderTokens, Session,
    SignupAck,
};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use qbank_config::Config;
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
const NEW_PASSWORD_REQUIRED: &str = "NEW_PASSWORD_REQUIRED";
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

impl std::fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

impl From<AuthenticationResult> for ProviderTokens {
    fn from(result: AuthenticationResult) -> Self {
        ProviderTokens {
            id_token: result.id_token,
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expires_in: result.expires_in,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    username: String,
    #[serde(default)]
    user_attributes: Vec<UserAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserAttribute {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

impl GetUserResponse {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.user_attributes
            .iter()
            .find(|attr| attr.name == name)
            .and_then(|attr| attr.value.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SignupErrorBody {
    #[serde(default)]
    error: String,
}

/// Map a provider error response onto the auth taxonomy.
///
/// Wrong password and unknown user collapse into `InvalidCredentials`.
fn map_provider_error(status: StatusCode, body: &str) -> AuthError {
    let parsed: ProviderErrorBody = serde_json::from_str(body).unwrap_or_default();
    // Some endpoints qualify the type: "com.amazonaws...#NotAuthorizedException"
    let kind = parsed.kind.rsplit('#').next().unwrap_or_default();

    match kind {
        "NotAuthorizedException" | "UserNotFoundException" | "UserNotConfirmedException" => {
            AuthError::InvalidCredentials
        }
        "UsernameExistsException" | "AliasExistsException" => AuthError::AlreadyExists,
        "InvalidPasswordException"
        | "InvalidParameterException"
        | "CodeMismatchException"
        | "ExpiredCodeException" => AuthError::ValidationError(parsed.message),
        "LimitExceededException" | "TooManyRequestsException" | "TooManyFailedAttemptsException" => {
            AuthError::NetworkError(format!("Rate limited: {}", parsed.message))
        }
        "ResourceNotFoundException" => {
            AuthError::Config(format!("Unknown app client: {}", parsed.message))
        }
        _ if status.is_server_error() => {
            AuthError::NetworkError(format!("Identity provider returned {}", status))
        }
        "" => AuthError::Provider(format!("HTTP {}", status)),
        other => AuthError::Provider(format!("{}: {}", other, parsed.message)),
    }
}

/// Identity provider client speaking the Cognito user-pool JSON protocol.
#[derive(Clone)]
pub struct CognitoIdentityClient {
    http_client: reqwest::Client,
    endpoint: Url,
    client_id: String,
    registration_url: Url,
}

impl CognitoIdentityClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `endpoint` - Provider JSON endpoint
    /// * `client_id` - Public app client id
    /// * `registration_url` - Admin provisioning endpoint (`POST /signup`)
    /// * `timeout` - Transport timeout applied to every call
    pub fn new(
        endpoint: Url,
        client_id: impl Into<String>,
        registration_url: Url,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            http_client,
            endpoint,
            client_id: client_id.into(),
            registration_url,
        })
    }

    pub fn from_config(config: &Config) -> AuthResult<Self> {
        Self::new(
            Url::parse(&config.identity_endpoint)?,
            config.client_id.clone(),
            config.signup_url()?,
            config.http_timeout(),
        )
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> AuthResult<T> {
        debug!(operation, "Identity provider call");

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, operation))
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = map_provider_error(status, &text);
            debug!(operation, status = %status, error = %err, "Identity provider rejected call");
            return Err(err);
        }

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|err| {
            AuthError::Provider(format!("Malformed {} response: {}", operation, err))
        })
    }

    /// Cognito answers a rejected refresh credential or access token with
    /// `NotAuthorizedException`; for an existing session that means expiry.
    fn session_rejected(err: AuthError) -> AuthError {
        match err {
            AuthError::InvalidCredentials => AuthError::SessionExpired,
            other => other,
        }
    }
}

#[async_trait]
impl IdentityClient for CognitoIdentityClient {
    async fn initiate_login(&self, login_id: &str, credential: &str) -> AuthResult<LoginStep> {
        let response: AuthResponse = self
            .call(
                "InitiateAuth",
                json!({
                    "AuthFlow": "USER_PASSWORD_AUTH",
                    "ClientId": self.client_id,
                    "AuthParameters": {
                        "USERNAME": login_id,
                        "PASSWORD": credential,
                    },
                }),
            )
            .await?;

        if let Some(result) = response.authentication_result {
            return Ok(LoginStep::Complete(result.into()));
        }

        match response.challenge_name.as_deref() {
            Some(NEW_PASSWORD_REQUIRED) => {
                let provider_session = response.session.ok_or_else(|| {
                    AuthError::Provider("Challenge without a session handle".to_string())
                })?;
                Ok(LoginStep::NewCredentialRequired(AuthChallenge {
                    kind: ChallengeKind::NewCredentialRequired,
                    pending_identity_hint: login_id.to_string(),
                    provider_session,
                }))
            }
            Some(other) => {
                warn!(challenge = %other, "Unsupported identity provider challenge");
                Err(AuthError::Provider(format!("Unsupported challenge {}", other)))
            }
            None => Err(AuthError::Provider(
                "Login response carried neither tokens nor a challenge".to_string(),
            )),
        }
    }

    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        new_credential: &str,
    ) -> AuthResult<ProviderTokens> {
        let response: AuthResponse = self
            .call(
                "RespondToAuthChallenge",
                json!({
                    "ChallengeName": NEW_PASSWORD_REQUIRED,
                    "ClientId": self.client_id,
                    "Session": challenge.provider_session,
                    "ChallengeResponses": {
                        "USERNAME": challenge.pending_identity_hint,
                        "NEW_PASSWORD": new_credential,
                    },
                }),
            )
            .await?;

        response.authentication_result.map(Into::into).ok_or_else(|| {
            AuthError::Provider(format!(
                "Challenge answered with another challenge: {}",
                response.challenge_name.unwrap_or_default()
            ))
        })
    }

    async fn initiate_registration(&self, login_id: &str) -> AuthResult<SignupAck> {
        debug!(login_id, "Provisioning identity");

        let response = self
            .http_client
            .post(self.registration_url.clone())
            .json(&json!({ "email": login_id }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let body: SignupResponse = serde_json::from_str(&text)
                .map_err(|err| AuthError::Provider(format!("Malformed signup response: {}", err)))?;
            return Ok(SignupAck {
                message: body.message,
                identity_ref: body.username.unwrap_or_else(|| login_id.to_string()),
            });
        }

        let error = serde_json::from_str::<SignupErrorBody>(&text)
            .unwrap_or_default()
            .error;
        Err(match status {
            StatusCode::CONFLICT => AuthError::AlreadyExists,
            StatusCode::BAD_REQUEST if error.to_lowercase().contains("already exists") => {
                AuthError::AlreadyExists
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AuthError::ValidationError(error)
            }
            status if status.is_server_error() => {
                AuthError::NetworkError(format!("Signup endpoint returned {}", status))
            }
            status => AuthError::Provider(format!("Signup returned {}: {}", status, error)),
        })
    }

    async fn confirm_registration(&self, login_id: &str, code: &str) -> AuthResult<()> {
        self.call::<IgnoredAny>(
            "ConfirmSignUp",
            json!({
                "ClientId": self.client_id,
                "Username": login_id,
                "ConfirmationCode": code,
            }),
        )
        .await?;
        Ok(())
    }

    async fn resend_code(&self, login_id: &str) -> AuthResult<()> {
        self.call::<IgnoredAny>(
            "ResendConfirmationCode",
            json!({
                "ClientId": self.client_id,
                "Username": login_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> AuthResult<()> {
        let Some(access_token) = session.access_token.as_deref() else {
            debug!("No access token, skipping remote sign-out");
            return Ok(());
        };

        self.call::<IgnoredAny>("GlobalSignOut", json!({ "AccessToken": access_token }))
            .await
            .map_err(Self::session_rejected)?;
        Ok(())
    }

    async fn fetch_current_identity(&self, session: &Session) -> AuthResult<Identity> {
        let access_token = session
            .access_token
            .as_deref()
            .ok_or(AuthError::SessionExpired)?;

        let user: GetUserResponse = self
            .call("GetUser", json!({ "AccessToken": access_token }))
            .await
            .map_err(Self::session_rejected)?;

        let login_id = user
            .attribute("email")
            .unwrap_or(&user.username)
            .trim()
            .to_lowercase();

        Ok(Identity {
            login_id,
            subject: user.attribute("sub").map(str::to_string),
            roles: session.identity.roles.clone(),
        })
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<ProviderTokens> {
        let response: AuthResponse = self
            .call(
                "InitiateAuth",
                json!({
                    "AuthFlow": "REFRESH_TOKEN_AUTH",
                    "ClientId": self.client_id,
                    "AuthParameters": {
                        "REFRESH_TOKEN": refresh_token,
                    },
                }),
            )
            .await
            .map_err(Self::session_rejected)?;

        response
            .authentication_result
            .map(Into::into)
            .ok_or_else(|| AuthError::Provider("Refresh returned no tokens".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_for, unsigned_jwt};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(operation: &str) -> String {
        format!("{}.{}", TARGET_PREFIX, operation)
    }

    fn client_for(server: &MockServer) -> CognitoIdentityClient {
        let base = Url::parse(&server.uri()).unwrap();
        CognitoIdentityClient::new(
            base.clone(),
            "test-client",
            base.join("/signup").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn provider_error(kind: &str, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({ "__type": kind, "message": message }))
    }

    #[tokio::test]
    async fn test_login_returns_tokens() {
        let server = MockServer::start().await;
        let id_token = unsigned_jwt(&json!({ "email": "a@x.com" }));

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", target("InitiateAuth").as_str()))
            .and(header("content-type", AMZ_JSON))
            .and(body_partial_json(json!({
                "AuthFlow": "USER_PASSWORD_AUTH",
                "ClientId": "test-client",
                "AuthParameters": { "USERNAME": "a@x.com" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": {
                    "IdToken": id_token,
                    "AccessToken": "access",
                    "RefreshToken": "refresh",
                    "ExpiresIn": 3600,
                    "TokenType": "Bearer"
                },
                "ChallengeParameters": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let step = client_for(&server)
            .initiate_login("a@x.com", "Password1")
            .await
            .unwrap();

        let LoginStep::Complete(tokens) = step else {
            panic!("expected tokens, got {:?}", step);
        };
        assert_eq!(tokens.id_token, id_token);
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(tokens.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_login_new_password_challenge() {
        let server = MockServer::start().await;
        Mock::given(header("x-amz-target", target("InitiateAuth").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ChallengeName": "NEW_PASSWORD_REQUIRED",
                "Session": "opaque-session",
                "ChallengeParameters": { "USER_ID_FOR_SRP": "a@x.com" }
            })))
            .mount(&server)
            .await;

        let step = client_for(&server)
            .initiate_login("a@x.com", "Temporary1")
            .await
            .unwrap();

        let LoginStep::NewCredentialRequired(challenge) = step else {
            panic!("expected challenge, got {:?}", step);
        };
        assert_eq!(challenge.kind, ChallengeKind::NewCredentialRequired);
        assert_eq!(challenge.pending_identity_hint, "a@x.com");
        assert_eq!(challenge.provider_session, "opaque-session");
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_identical() {
        for kind in ["NotAuthorizedException", "UserNotFoundException"] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(provider_error(kind, "details that must not leak"))
                .mount(&server)
                .await;

            let err = client_for(&server)
                .initiate_login("a@x.com", "wrong")
                .await
                .unwrap_err();
            assert_eq!(err, AuthError::InvalidCredentials);
        }
    }

    #[tokio::test]
    async fn test_respond_to_challenge_sends_session() {
        let server = MockServer::start().await;
        let id_token = unsigned_jwt(&json!({ "email": "a@x.com" }));

        Mock::given(header("x-amz-target", target("RespondToAuthChallenge").as_str()))
            .and(body_partial_json(json!({
                "ChallengeName": "NEW_PASSWORD_REQUIRED",
                "Session": "opaque-session",
                "ChallengeResponses": { "USERNAME": "a@x.com", "NEW_PASSWORD": "NewPass123" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": { "IdToken": id_token, "ExpiresIn": 900 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let challenge = AuthChallenge {
            kind: ChallengeKind::NewCredentialRequired,
            pending_identity_hint: "a@x.com".to_string(),
            provider_session: "opaque-session".to_string(),
        };
        let tokens = client_for(&server)
            .respond_to_challenge(&challenge, "NewPass123")
            .await
            .unwrap();
        assert_eq!(tokens.expires_in, 900);
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_invalid_password_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(provider_error(
                "com.amazonaws.cognito#InvalidPasswordException",
                "Password does not conform to policy",
            ))
            .mount(&server)
            .await;

        let challenge = AuthChallenge {
            kind: ChallengeKind::NewCredentialRequired,
            pending_identity_hint: "a@x.com".to_string(),
            provider_session: "s".to_string(),
        };
        let err = client_for(&server)
            .respond_to_challenge(&challenge, "NewPass123")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_session_expired() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({ "AuthFlow": "REFRESH_TOKEN_AUTH" })))
            .respond_with(provider_error("NotAuthorizedException", "Refresh Token has expired"))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh_session("stale").await.unwrap_err();
        assert_eq!(err, AuthError::SessionExpired);
    }

    #[tokio::test]
    async fn test_fetch_session_keeps_refresh_token() {
        let server = MockServer::start().await;
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let id_token = unsigned_jwt(&json!({
            "email": "a@x.com",
            "exp": exp,
            "cognito:groups": ["Admin"]
        }));
        Mock::given(body_partial_json(json!({
            "AuthFlow": "REFRESH_TOKEN_AUTH",
            "AuthParameters": { "REFRESH_TOKEN": "rt-1" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": { "IdToken": id_token, "AccessToken": "access", "ExpiresIn": 3600 }
        })))
        .mount(&server)
        .await;

        let session = client_for(&server).fetch_session(None, "rt-1").await.unwrap();
        assert_eq!(session.identity.login_id, "a@x.com");
        assert!(session.identity.has_role("Admin"));
        assert_eq!(session.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn test_server_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .initiate_login("a@x.com", "Password1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NetworkError(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_registration_success_and_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .and(body_partial_json(json!({ "email": "a@x.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "User created successfully",
                "username": "a@x.com"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/signup"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "User already exists" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ack = client.initiate_registration("a@x.com").await.unwrap();
        assert_eq!(ack.identity_ref, "a@x.com");
        assert_eq!(ack.message, "User created successfully");

        let err = client.initiate_registration("a@x.com").await.unwrap_err();
        assert_eq!(err, AuthError::AlreadyExists);
    }

    #[tokio::test]
    async fn test_registration_conflict_status() {
        let server = MockServer::start().await;
        Mock::given(path("/signup"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .initiate_registration("a@x.com")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AlreadyExists);
    }

    #[tokio::test]
    async fn test_sign_out_and_get_user_use_access_token() {
        let server = MockServer::start().await;
        Mock::given(header("x-amz-target", target("GlobalSignOut").as_str()))
            .and(body_partial_json(json!({ "AccessToken": "access-a@x.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(header("x-amz-target", target("GetUser").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Username": "0f1e-uuid",
                "UserAttributes": [
                    { "Name": "sub", "Value": "0f1e-uuid" },
                    { "Name": "email", "Value": "A@X.com" }
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let session = session_for("a@x.com", &["Admin"], chrono::Duration::hours(1));

        let identity = client.fetch_current_identity(&session).await.unwrap();
        assert_eq!(identity.login_id, "a@x.com");
        assert_eq!(identity.subject.as_deref(), Some("0f1e-uuid"));
        assert!(identity.has_role("Admin"));

        client.sign_out(&session).await.unwrap();
    }

    #[test]
    fn test_map_provider_error_fallbacks() {
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, r#"{"__type":"UsernameExistsException"}"#),
            AuthError::AlreadyExists
        );
        assert!(matches!(
            map_provider_error(StatusCode::BAD_REQUEST, "not json"),
            AuthError::Provider(_)
        ));
        assert!(matches!(
            map_provider_error(StatusCode::BAD_GATEWAY, ""),
            AuthError::NetworkError(_)
        ));
        assert!(matches!(
            map_provider_error(StatusCode::BAD_REQUEST, r#"{"__type":"LimitExceededException"}"#),
            AuthError::NetworkError(_)
        ));
    }
}
