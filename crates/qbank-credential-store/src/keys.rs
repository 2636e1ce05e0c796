//! Storage key constants.

/// Storage keys used by the session layer
pub struct StorageKeys;

impl StorageKeys {
    /// Refresh credential issued by the identity provider
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Session metadata (JSON): login id and expiry of the last identity token
    pub const SESSION_META: &'static str = "session_meta";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct() {
        assert_ne!(StorageKeys::REFRESH_TOKEN, StorageKeys::SESSION_META);
        assert!(!StorageKeys::REFRESH_TOKEN.is_empty());
    }
}
