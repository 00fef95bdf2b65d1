//! OAuth2 authorization-code login.
//!
//! An unauthenticated client receives a `Bearer x_redirect_server=..., x_token_server=...`
//! challenge together with a nonce cookie. The browser follows the redirect server to the
//! provider, comes back through `/oauth2/callback`, and the client polls the token server for
//! the resulting access token. The provider's identity token must carry the hash of the nonce
//! cookie, which binds the callback to the browser that started the flow.

mod challenge;
pub mod client;
mod service;
mod state;


use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

pub use challenge::{hash_nonce, TokenPoll};
pub use client::{HttpOAuth2Client, OAuth2Client, OAuth2Response};
pub use service::{CallbackOutcome, CallbackRequest, CallbackResponse, OAuth2Service, Redirect};

use super::jwt::JwksConfig;
use super::{
    user_mapping, AuthenticationError, Authenticate, Challenge, ChallengeContext, Credentials,
    UserMapping,
};
use crate::configuration::Error as ConfigError;
use crate::identity::Identity;
use crate::secret::Secret;

pub const NONCE_COOKIE: &str = "coordinator_oauth2_nonce";
pub const NONCE_COOKIE_PATH: &str = "/oauth2";
pub const UI_COOKIE_PATH: &str = "/ui/";
pub const CALLBACK_PATH: &str = "/oauth2/callback";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub issuer: String,
    pub auth_url: String,
    pub token_url: String,
    pub jwks_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub state_key: Secret<String>,
    #[serde(default = "Config::default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "Config::default_principal_field")]
    pub principal_field: String,
    #[serde(default)]
    pub groups_field: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "Config::default_challenge_timeout")]
    pub challenge_timeout: u64,
    #[serde(default = "Config::default_max_challenges")]
    pub max_challenges: usize,
    #[serde(default)]
    pub user_mapping: user_mapping::Config,
    #[serde(flatten)]
    pub jwks: JwksConfig,
}

impl Config {
    fn default_scopes() -> Vec<String> {
        vec!["openid".to_string()]
    }

    fn default_principal_field() -> String {
        "sub".to_string()
    }

    fn default_challenge_timeout() -> u64 {
        900
    }

    fn default_max_challenges() -> usize {
        10_000
    }

    /// Audience required of access and identity tokens.
    pub fn audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.client_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "auth.oauth2.client_id must not be empty".to_string(),
            ));
        }
        if self.state_key.is_blank() {
            return Err(ConfigError::Invalid(
                "auth.oauth2.state_key must not be empty".to_string(),
            ));
        }
        if self.challenge_timeout == 0 {
            return Err(ConfigError::Invalid(
                "auth.oauth2.challenge_timeout must be positive".to_string(),
            ));
        }
        if self.max_challenges == 0 {
            return Err(ConfigError::Invalid(
                "auth.oauth2.max_challenges must be positive".to_string(),
            ));
        }
        self.jwks.validate("auth.oauth2")?;

        for (name, url) in [
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("jwks_url", &self.jwks_url),
        ] {
            Url::parse(url).map_err(|error| {
                ConfigError::Invalid(format!("Invalid auth.oauth2.{name} '{url}': {error}"))
            })?;
        }

        UserMapping::new(&self.user_mapping)?;
        Ok(())
    }
}

/// Accepts access tokens issued through the OAuth2 flow, as a bearer token or, on UI paths,
/// the UI cookie.
pub struct OAuth2Authenticator {
    service: Arc<OAuth2Service>,
}

impl OAuth2Authenticator {
    pub fn new(service: Arc<OAuth2Service>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Authenticate for OAuth2Authenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let Some(token) = credentials.token() else {
            return Err(AuthenticationError::NoCredentials);
        };

        self.service.authenticate_token(token).await
    }

    async fn challenge(&self, context: &ChallengeContext) -> Option<Challenge> {
        Some(self.service.challenge(context).await)
    }
}
