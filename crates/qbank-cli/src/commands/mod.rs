//! CLI command implementations.

mod auth;
mod questions;

pub use auth::{login, logout, signup, status};
pub use questions::{
    answer, questions_create, questions_delete, questions_list, questions_show, questions_update,
    QuestionFields,
};

use anyhow::Result;
use qbank_api::ApiClient;
use qbank_auth::{AuthConfig, AuthError, AuthService, CognitoIdentityClient};
use qbank_config::{Config, Paths};
use qbank_credential_store::{CredentialStore, FileStorage};
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, wired from the on-disk configuration.
pub struct Context {
    pub auth: AuthService,
    pub api: ApiClient,
}

impl Context {
    /// Build the controller and resume any persisted session.
    pub async fn load(paths: &Paths, config: &Config) -> Result<Self> {
        paths.ensure_dirs()?;

        let identity = Arc::new(CognitoIdentityClient::from_config(config).map_err(into_anyhow)?);
        let store = CredentialStore::new(Box::new(FileStorage::new(paths.credentials_file())));
        let auth = AuthService::with_credential_store(identity, AuthConfig::from(config), store);

        let state = auth.start().await.map_err(into_anyhow)?;
        debug!(state = %state, "Auth service started");

        let api = ApiClient::from_config(config, Arc::new(auth.clone())).map_err(into_anyhow)?;

        Ok(Self { auth, api })
    }
}

/// Turn an auth error into its user-facing message.
pub fn into_anyhow(err: AuthError) -> anyhow::Error {
    debug!(error = %err, "Command failed");
    anyhow::anyhow!(crate::output::describe(&err))
}
