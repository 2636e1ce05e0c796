//! Role checks over the live session.
//!
//! Nothing here caches: every check reads the session it is given, so a
//! replaced session can never leave stale privileges behind.

use crate::Session;
use serde::{Deserialize, Serialize};

/// The only role the client interprets.
pub const ADMIN_ROLE: &str = "Admin";

/// Question-bank actions the UI may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ListQuestions,
    ViewQuestion,
    CreateQuestion,
    UpdateQuestion,
    DeleteQuestion,
    SubmitAnswer,
}

impl Action {
    /// Role required beyond being signed in, if any.
    pub fn required_role(self) -> Option<&'static str> {
        match self {
            Action::CreateQuestion | Action::UpdateQuestion | Action::DeleteQuestion => {
                Some(ADMIN_ROLE)
            }
            Action::ListQuestions | Action::ViewQuestion | Action::SubmitAnswer => None,
        }
    }
}

pub struct AuthorizationGate;

impl AuthorizationGate {
    /// False for an absent session.
    pub fn has_role(session: Option<&Session>, role: &str) -> bool {
        session.is_some_and(|session| session.identity.has_role(role))
    }

    pub fn is_admin(session: Option<&Session>) -> bool {
        Self::has_role(session, ADMIN_ROLE)
    }

    /// Whether `action` should be offered for `session`.
    pub fn can(session: Option<&Session>, action: Action) -> bool {
        match (session, action.required_role()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(role)) => Self::has_role(session, role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session_for;

    #[test]
    fn test_has_role_admin() {
        let admin = session_for("a@x.com", &["Admin"], chrono::Duration::hours(1));
        let member = session_for("b@x.com", &["Reviewers"], chrono::Duration::hours(1));

        assert!(AuthorizationGate::has_role(Some(&admin), ADMIN_ROLE));
        assert!(!AuthorizationGate::has_role(Some(&member), ADMIN_ROLE));
        assert!(!AuthorizationGate::has_role(None, ADMIN_ROLE));
    }

    #[test]
    fn test_role_match_is_exact() {
        let session = session_for("a@x.com", &["admin", "Admins"], chrono::Duration::hours(1));
        assert!(!AuthorizationGate::is_admin(Some(&session)));
    }

    #[test]
    fn test_can_gates_mutations_only() {
        let admin = session_for("a@x.com", &["Admin"], chrono::Duration::hours(1));
        let member = session_for("b@x.com", &[], chrono::Duration::hours(1));

        assert!(AuthorizationGate::can(Some(&member), Action::ListQuestions));
        assert!(AuthorizationGate::can(Some(&member), Action::SubmitAnswer));
        assert!(!AuthorizationGate::can(Some(&member), Action::DeleteQuestion));
        assert!(!AuthorizationGate::can(Some(&member), Action::CreateQuestion));
        assert!(AuthorizationGate::can(Some(&admin), Action::UpdateQuestion));
        assert!(!AuthorizationGate::can(None, Action::ViewQuestion));
    }
}
