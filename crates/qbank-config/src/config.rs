//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default question API base URL (overridable at compile time via QBANK_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("QBANK_API_URL") {
    Some(url) => url,
    None => "https://api.qbank.example/",
};

/// Default identity provider endpoint (overridable at compile time via QBANK_IDENTITY_ENDPOINT).
pub const DEFAULT_IDENTITY_ENDPOINT: &str = match option_env!("QBANK_IDENTITY_ENDPOINT") {
    Some(url) => url,
    None => "https://cognito-idp.eu-west-1.amazonaws.com/",
};

/// Default public app client id registered with the identity provider.
pub const DEFAULT_CLIENT_ID: &str = match option_env!("QBANK_CLIENT_ID") {
    Some(id) => id,
    None => "qbank-web-client",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Tokens closer than this to expiry are refreshed before use.
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

/// Upper bound for the silent session resume at startup.
pub const DEFAULT_RESUME_TIMEOUT_SECS: u64 = 5;

/// Transport timeout for identity provider and API calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the question API (with or without trailing slash).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Identity provider JSON endpoint.
    #[serde(default = "default_identity_endpoint")]
    pub identity_endpoint: String,
    /// Public app client id.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_resume_timeout_secs")]
    pub resume_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_identity_endpoint() -> String {
    DEFAULT_IDENTITY_ENDPOINT.to_string()
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_refresh_margin_secs() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

fn default_resume_timeout_secs() -> u64 {
    DEFAULT_RESUME_TIMEOUT_SECS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            identity_endpoint: default_identity_endpoint(),
            client_id: default_client_id(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            resume_timeout_secs: DEFAULT_RESUME_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply `QBANK_*` environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            tracing::debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from `QBANK_*` variables resolved through `lookup`.
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(level) = value("QBANK_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = value("QBANK_API_URL") {
            self.api_url = url;
        }
        if let Some(endpoint) = value("QBANK_IDENTITY_ENDPOINT") {
            self.identity_endpoint = endpoint;
        }
        if let Some(client_id) = value("QBANK_CLIENT_ID") {
            self.client_id = client_id;
        }
    }

    /// Check URLs parse and timeouts are usable.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        Url::parse(&self.identity_endpoint)?;

        if self.client_id.trim().is_empty() {
            return Err(CoreError::Config("client_id must not be empty".to_string()));
        }
        if self.resume_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(CoreError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Question API base URL, normalized to end with `/` so relative joins work.
    pub fn api_url(&self) -> CoreResult<Url> {
        let mut raw = self.api_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(CoreError::from)
    }

    /// Admin-provisioning signup endpoint (`POST /signup`).
    pub fn signup_url(&self) -> CoreResult<Url> {
        Ok(self.api_url()?.join("signup")?)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn resume_timeout(&self) -> Duration {
        Duration::from_secs(self.resume_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.refresh_margin(), Duration::from_secs(300));
        assert_eq!(config.resume_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug", "refresh_margin_secs": 60 }"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.refresh_margin_secs, 60);
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.api_url = "https://questions.internal.test/prod".to_string();
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.api_url, "https://questions.internal.test/prod");
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let env: HashMap<&str, &str> = [
            ("QBANK_LOG_LEVEL", "trace"),
            ("QBANK_API_URL", "  "),
            ("QBANK_CLIENT_ID", "other-client"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.client_id, "other-client");
    }

    #[test]
    fn test_api_url_gets_trailing_slash() {
        let mut config = Config::default();
        config.api_url = "https://questions.internal.test/prod".to_string();

        assert_eq!(
            config.signup_url().unwrap().as_str(),
            "https://questions.internal.test/prod/signup"
        );
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.identity_endpoint = "not a valid url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.resume_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
