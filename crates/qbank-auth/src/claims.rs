//! Typed view of identity token claims.
//!
//! Tokens are decoded, not verified: the API gateway verifies signatures and
//! these claims only drive local display and UI gating. Anything missing or
//! malformed degrades to the default (no groups means no privileges).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, rename = "cognito:username", deserialize_with = "lenient_string")]
    pub username: Option<String>,
    /// Expiry as seconds since the epoch.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub exp: Option<i64>,
    #[serde(default, rename = "cognito:groups", deserialize_with = "lenient_groups")]
    pub groups: Vec<String>,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(token: &str) -> Self {
        let Some(payload) = token.split('.').nth(1) else {
            tracing::debug!("Token has no payload segment");
            return Self::default();
        };

        let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(error = %err, "Token payload is not base64url");
                return Self::default();
            }
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "Token payload is not a claims object");
            Self::default()
        })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Login id asserted by the token, preferring the email claim.
    pub fn login_id(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.username.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|secs| secs as i64)),
        Value::String(text) => text.parse().ok(),
        _ => None,
    })
}

fn lenient_groups<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(group) => Some(group),
                _ => None,
            })
            .collect(),
        Value::String(group) => vec![group],
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_with(payload: Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn test_decode_full_claims() {
        let token = token_with(json!({
            "sub": "abc-123",
            "email": "a@x.com",
            "cognito:username": "abc-123",
            "exp": 1_900_000_000,
            "cognito:groups": ["Admin", "Reviewers"]
        }));

        let claims = TokenClaims::decode(&token);
        assert_eq!(claims.sub.as_deref(), Some("abc-123"));
        assert_eq!(claims.login_id(), Some("a@x.com"));
        assert_eq!(claims.groups, vec!["Admin", "Reviewers"]);
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_missing_groups_means_none() {
        let claims = TokenClaims::decode(&token_with(json!({ "email": "b@x.com" })));
        assert!(claims.groups.is_empty());
        assert!(claims.exp.is_none());
    }

    #[test]
    fn test_malformed_fields_degrade_individually() {
        let claims = TokenClaims::decode(&token_with(json!({
            "email": 42,
            "cognito:username": "fallback-user",
            "exp": "1900000000",
            "cognito:groups": ["Admin", 7, null]
        })));

        assert_eq!(claims.email, None);
        assert_eq!(claims.login_id(), Some("fallback-user"));
        assert_eq!(claims.exp, Some(1_900_000_000));
        assert_eq!(claims.groups, vec!["Admin"]);
    }

    #[test]
    fn test_garbage_token_is_default() {
        assert_eq!(TokenClaims::decode("not-a-jwt"), TokenClaims::default());
        assert_eq!(TokenClaims::decode("a.!!!.c"), TokenClaims::default());
        assert_eq!(
            TokenClaims::decode(&format!("a.{}.c", URL_SAFE_NO_PAD.encode("[1,2]"))),
            TokenClaims::default()
        );
    }
}
