//! Session and authorization controller for the QBank client.
//!
//! This crate provides:
//! - An explicit FSM for the login, challenge and logout lifecycle
//! - A single-slot session cache with de-duplicated token refresh
//! - Role checks over the live session
//! - An HTTP client for the identity provider's JSON protocol

mod auth_fsm;
mod authorization;
mod claims;
mod cognito_client;
mod error;
mod identity;
mod service;
mod session_cache;
mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use auth_fsm::auth_machine;
pub use auth_fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChangedPayload};
pub use authorization::{Action, AuthorizationGate, ADMIN_ROLE};
pub use claims::TokenClaims;
pub use cognito_client::CognitoIdentityClient;
pub use error::{AuthError, AuthResult};
pub use identity::{
    AuthChallenge, ChallengeKind, Identity, IdentityClient, LoginStep, ProviderTokens, Session,
    SignupAck, TokenProvider,
};
pub use service::{AuthConfig, AuthService, AuthSnapshot, AuthStateCallback};
pub use session_cache::SessionCache;
pub use validation::{normalize_login_id, validate_new_credential};
