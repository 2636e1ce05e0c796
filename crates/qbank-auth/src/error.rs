//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
///
/// Cloneable so a single refresh failure can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong password or unknown identity. The two are never distinguished.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The provider demands a credential rotation before issuing a session
    #[error("New password required")]
    ChallengeRequired,

    /// `complete_challenge` or `abandon_challenge` without a pending challenge
    #[error("No active challenge")]
    NoActiveChallenge,

    /// Identity already provisioned
    #[error("Identity already exists")]
    AlreadyExists,

    /// Session expired, was rejected by the API, or could not be refreshed
    #[error("Session expired")]
    SessionExpired,

    /// Authenticated but lacking the role for the operation
    #[error("Forbidden")]
    Forbidden,

    /// Another login or challenge completion is already running
    #[error("Authentication operation already in progress")]
    OperationInProgress,

    /// Transport failure or 5xx from a remote
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed input rejected before any remote call
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Credential storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected response from the identity provider
    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns true if this error is transient and the caller may retry.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::NetworkError(_) | AuthError::Timeout)
    }

    /// Message suitable for showing to an end user. Never includes provider
    /// detail and never reveals whether an identity exists.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Incorrect email or password.",
            AuthError::ChallengeRequired => "You must set a new password before continuing.",
            AuthError::NoActiveChallenge => "There is no pending password change.",
            AuthError::AlreadyExists => "An account with this email already exists.",
            AuthError::SessionExpired => "Your session has expired. Please sign in again.",
            AuthError::Forbidden => "You do not have permission to perform this action.",
            AuthError::OperationInProgress => "Please wait for the current sign-in to finish.",
            AuthError::NetworkError(_) => "Could not reach the server. Check your connection and try again.",
            AuthError::ValidationError(_) => "Some of the information entered is not valid.",
            AuthError::NotFound(_) => "The requested item could not be found.",
            AuthError::InvalidStateTransition(_) => "That action is not available right now.",
            AuthError::Timeout => "The server took too long to respond. Please try again.",
            AuthError::Storage(_) => "Saved sign-in data could not be accessed.",
            AuthError::Config(_) => "The application is not configured correctly.",
            AuthError::Provider(_) => "The sign-in service returned an unexpected response.",
            AuthError::Internal(_) => "Something went wrong. Please try again.",
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout
        } else if err.is_decode() {
            AuthError::Provider(format!("Malformed response: {}", err))
        } else {
            AuthError::NetworkError(err.to_string())
        }
    }
}

impl From<qbank_credential_store::StorageError> for AuthError {
    fn from(err: qbank_credential_store::StorageError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<qbank_config::CoreError> for AuthError {
    fn from(err: qbank_config::CoreError) -> Self {
        AuthError::Config(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        AuthError::Config(format!("Invalid URL: {}", err))
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
