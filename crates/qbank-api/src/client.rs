//! HTTP client for the question API.

use crate::models::{EvaluationRequest, EvaluationResponse, Question, QuestionDraft};
use qbank_auth::{AuthError, AuthResult, TokenProvider};
use qbank_config::Config;
use reqwest::{Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Question API client.
///
/// Attaches `Authorization: Bearer <token>` when the token provider has a
/// session and omits the header otherwise.
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    /// * `base_url` - API root; a trailing slash is added when missing
    /// * `tokens` - Source of bearer tokens, told when the API rejects one
    /// * `timeout` - Transport timeout for every request
    pub fn new(base_url: Url, tokens: Arc<dyn TokenProvider>, timeout: Duration) -> AuthResult<Self> {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Config(format!("Failed to build HTTP client: {}", err)))?;

        Ok(Self {
            http_client,
            base_url,
            tokens,
        })
    }

    pub fn from_config(config: &Config, tokens: Arc<dyn TokenProvider>) -> AuthResult<Self> {
        Self::new(config.api_url()?, tokens, config.http_timeout())
    }

    fn question_path(id: &str) -> String {
        format!("questions/{}", urlencoding::encode(id))
    }

    /// List every question.
    pub async fn list_questions(&self) -> AuthResult<Vec<Question>> {
        self.send(Method::GET, "questions", None::<&()>).await
    }

    pub async fn get_question(&self, id: &str) -> AuthResult<Question> {
        self.send(Method::GET, &Self::question_path(id), None::<&()>)
            .await
    }

    /// Create a question. Admin only; enforced by the API gateway.
    pub async fn create_question(&self, draft: &QuestionDraft) -> AuthResult<Question> {
        self.send(Method::POST, "questions", Some(draft)).await
    }

    /// Replace a question. Admin only.
    pub async fn update_question(&self, id: &str, draft: &QuestionDraft) -> AuthResult<Question> {
        self.send(Method::PUT, &Self::question_path(id), Some(draft))
            .await
    }

    /// Delete a question. Admin only.
    pub async fn delete_question(&self, id: &str) -> AuthResult<()> {
        self.send::<IgnoredAny, ()>(Method::DELETE, &Self::question_path(id), None)
            .await?;
        Ok(())
    }

    /// Submit a free-text answer for evaluation.
    pub async fn evaluate_answer(&self, request: &EvaluationRequest) -> AuthResult<EvaluationResponse> {
        self.send(Method::POST, "answers", Some(request)).await
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> AuthResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.base_url.join(path)?;
        let mut request = self.http_client.request(method.clone(), url);

        // No session means no header at all, never an empty one.
        let token = self.tokens.bearer_token().await;
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, path, "API request");

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(self.map_status(&method, path, token.as_deref(), status, &text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|err| {
            AuthError::Provider(format!("Malformed response from {} {}: {}", method, path, err))
        })
    }

    fn map_status(
        &self,
        method: &Method,
        path: &str,
        sent_token: Option<&str>,
        status: StatusCode,
        body: &str,
    ) -> AuthError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .unwrap_or_default()
            .error;

        match status {
            StatusCode::UNAUTHORIZED => {
                warn!(method = %method, path, "API rejected session token");
                if let Some(token) = sent_token {
                    self.tokens.invalidate_session(token);
                }
                AuthError::SessionExpired
            }
            StatusCode::FORBIDDEN => {
                debug!(method = %method, path, "API denied access");
                AuthError::Forbidden
            }
            StatusCode::NOT_FOUND => AuthError::NotFound(if message.is_empty() {
                path.to_string()
            } else {
                message
            }),
            StatusCode::CONFLICT => AuthError::AlreadyExists,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AuthError::ValidationError(message)
            }
            status if status.is_server_error() => {
                warn!(method = %method, path, status = %status, error = %message, "API server error");
                AuthError::NetworkError(format!("API returned {}", status))
            }
            status => AuthError::Provider(format!("API returned {}: {}", status, message)),
        }
    }
}
