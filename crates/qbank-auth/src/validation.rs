//! Input checks that run before any remote call.

use crate::{AuthError, AuthResult};
use regex::Regex;
use std::sync::OnceLock;

const MIN_PASSWORD_LEN: usize = 8;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern is a valid regex")
    })
}

/// Trim and lowercase a login id, rejecting anything that is not an email.
pub fn normalize_login_id(raw: &str) -> AuthResult<String> {
    let login_id = raw.trim().to_lowercase();
    if login_id.is_empty() {
        return Err(AuthError::ValidationError("Email is required".to_string()));
    }
    if !email_pattern().is_match(&login_id) {
        return Err(AuthError::ValidationError(
            "Please enter a valid email address".to_string(),
        ));
    }
    Ok(login_id)
}

/// A current password only needs to be present; the provider judges it.
pub fn require_credential(credential: &str) -> AuthResult<()> {
    if credential.is_empty() {
        return Err(AuthError::ValidationError("Password is required".to_string()));
    }
    Ok(())
}

/// Password policy for a new credential: at least eight characters with one
/// lowercase letter, one uppercase letter and one digit.
pub fn validate_new_credential(credential: &str) -> AuthResult<()> {
    let mut problems = Vec::new();
    if credential.chars().count() < MIN_PASSWORD_LEN {
        problems.push("be at least 8 characters long");
    }
    if !credential.chars().any(|c| c.is_lowercase()) {
        problems.push("contain a lowercase letter");
    }
    if !credential.chars().any(|c| c.is_uppercase()) {
        problems.push("contain an uppercase letter");
    }
    if !credential.chars().any(|c| c.is_ascii_digit()) {
        problems.push("contain a number");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AuthError::ValidationError(format!(
            "Password must {}",
            problems.join(", ")
        )))
    }
}
