//! Authentication state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                    ┌───────────────────┐  ResumeAttempt   ┌──────────┐
//!                    │  Unauthenticated  │ ───────────────► │ Resuming │
//!                    │     (initial)     │ ◄─────────────── └────┬─────┘
//!                    └─────────┬─────────┘     NoSession         │ SessionResumed
//!                              │ LoginAttempt                    │
//!                              ▼                                 │
//! ┌────────┐  LoginFailed ┌────────────────┐ LoginSucceeded      ▼
//! │ Failed │ ◄─────────── │ Authenticating │ ─────────────► ┌───────────────┐
//! └───┬────┘              └───┬────────▲───┘                │ Authenticated │
//!     │ LoginAttempt          │        │                    └───────┬───────┘
//!     └──────────► ...        │        │ ChallengeSubmitted         │ SessionInvalidated
//!                ChallengeIssued       │                            ▼
//!                             ▼        │                     Unauthenticated
//!                       ┌──────────────┴────┐
//!                       │ ChallengeRequired │ ── ChallengeAbandoned ──► Unauthenticated
//!                       └───────────────────┘
//! ```
//!
//! `LogoutRequested` is accepted in every state and always lands in
//! `Unauthenticated`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Unauthenticated)

    Unauthenticated => {
        ResumeAttempt => Resuming,
        LoginAttempt => Authenticating,
        LogoutRequested => Unauthenticated
    },
    Resuming => {
        SessionResumed => Authenticated,
        NoSession => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    Authenticating => {
        LoginSucceeded => Authenticated,
        ChallengeIssued => ChallengeRequired,
        LoginFailed => Failed,
        LogoutRequested => Unauthenticated
    },
    ChallengeRequired => {
        ChallengeSubmitted => Authenticating,
        ChallengeAbandoned => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    Authenticated => {
        // Refresh failure or a 401 from the API
        SessionInvalidated => Unauthenticated,
        LogoutRequested => Unauthenticated
    },
    Failed => {
        LoginAttempt => Authenticating,
        LogoutRequested => Unauthenticated
    }
}

pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Authentication state for external consumption (CLI, callbacks, logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No session.
    Unauthenticated,
    /// Probing stored credentials at startup.
    Resuming,
    /// Waiting on the identity provider.
    Authenticating,
    /// Provider demanded a new password.
    ChallengeRequired,
    /// Holding a usable session.
    Authenticated,
    /// Last login or challenge attempt was rejected.
    Failed,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// Returns true while a remote call decides the next state.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthState::Resuming | AuthState::Authenticating)
    }

    /// Whether `login` may start from this state.
    pub fn accepts_login(&self) -> bool {
        matches!(self, AuthState::Unauthenticated | AuthState::Failed)
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Unauthenticated => AuthState::Unauthenticated,
            AuthMachineState::Resuming => AuthState::Resuming,
            AuthMachineState::Authenticating => AuthState::Authenticating,
            AuthMachineState::ChallengeRequired => AuthState::ChallengeRequired,
            AuthMachineState::Authenticated => AuthState::Authenticated,
            AuthMachineState::Failed => AuthState::Failed,
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Resuming => "resuming",
            AuthState::Authenticating => "authenticating",
            AuthState::ChallengeRequired => "challenge_required",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Payload for auth state change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStateChangedPayload {
    pub state: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_id: Option<String>,
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(inputs: &[AuthMachineInput]) -> AuthMachine {
        let mut machine = AuthMachine::new();
        for input in inputs {
            machine.consume(input).unwrap();
        }
        machine
    }

    #[test]
    fn test_initial_state_is_unauthenticated() {
        let machine = AuthMachine::new();
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
    }

    #[test]
    fn test_login_flow() {
        let mut machine = AuthMachine::new();

        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticating);

        machine.consume(&AuthMachineInput::LoginSucceeded).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticated);
    }

    #[test]
    fn test_challenge_flow() {
        let mut machine = machine_in(&[
            AuthMachineInput::LoginAttempt,
            AuthMachineInput::ChallengeIssued,
        ]);
        assert_eq!(*machine.state(), AuthMachineState::ChallengeRequired);

        machine.consume(&AuthMachineInput::ChallengeSubmitted).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticating);

        machine.consume(&AuthMachineInput::LoginSucceeded).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticated);
    }

    #[test]
    fn test_cannot_login_with_pending_challenge() {
        let mut machine = machine_in(&[
            AuthMachineInput::LoginAttempt,
            AuthMachineInput::ChallengeIssued,
        ]);

        assert!(machine.consume(&AuthMachineInput::LoginAttempt).is_err());
        assert_eq!(*machine.state(), AuthMachineState::ChallengeRequired);

        machine.consume(&AuthMachineInput::ChallengeAbandoned).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
    }

    #[test]
    fn test_failed_login_can_retry() {
        let mut machine = machine_in(&[
            AuthMachineInput::LoginAttempt,
            AuthMachineInput::LoginFailed,
        ]);
        assert_eq!(*machine.state(), AuthMachineState::Failed);

        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Authenticating);
    }

    #[test]
    fn test_resume_flows() {
        let machine = machine_in(&[
            AuthMachineInput::ResumeAttempt,
            AuthMachineInput::SessionResumed,
        ]);
        assert_eq!(*machine.state(), AuthMachineState::Authenticated);

        let machine = machine_in(&[AuthMachineInput::ResumeAttempt, AuthMachineInput::NoSession]);
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
    }

    #[test]
    fn test_cannot_succeed_without_attempt() {
        let mut machine = AuthMachine::new();
        assert!(machine.consume(&AuthMachineInput::LoginSucceeded).is_err());
        assert!(machine.consume(&AuthMachineInput::ChallengeSubmitted).is_err());
        assert!(machine.consume(&AuthMachineInput::SessionInvalidated).is_err());
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
    }

    #[test]
    fn test_logout_accepted_everywhere() {
        let paths: &[&[AuthMachineInput]] = &[
            &[],
            &[AuthMachineInput::ResumeAttempt],
            &[AuthMachineInput::LoginAttempt],
            &[AuthMachineInput::LoginAttempt, AuthMachineInput::ChallengeIssued],
            &[AuthMachineInput::LoginAttempt, AuthMachineInput::LoginSucceeded],
            &[AuthMachineInput::LoginAttempt, AuthMachineInput::LoginFailed],
        ];

        for path in paths {
            let mut machine = machine_in(path);
            machine.consume(&AuthMachineInput::LogoutRequested).unwrap();
            assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
        }
    }

    #[test]
    fn test_late_login_outcome_rejected_after_logout() {
        let mut machine = machine_in(&[
            AuthMachineInput::LoginAttempt,
            AuthMachineInput::LogoutRequested,
        ]);
        assert!(machine.consume(&AuthMachineInput::LoginSucceeded).is_err());
        assert_eq!(*machine.state(), AuthMachineState::Unauthenticated);
    }

    #[test]
    fn test_auth_state_conversion() {
        assert_eq!(
            AuthState::from(&AuthMachineState::ChallengeRequired),
            AuthState::ChallengeRequired
        );
        assert!(AuthState::Authenticated.is_authenticated());
        assert!(AuthState::Resuming.is_transient());
        assert!(!AuthState::ChallengeRequired.accepts_login());
        assert!(AuthState::Failed.accepts_login());
    }

    #[test]
    fn test_auth_state_serializes_snake_case() {
        let json = serde_json::to_string(&AuthState::ChallengeRequired).unwrap();
        assert_eq!(json, "\"challenge_required\"");
    }
}
