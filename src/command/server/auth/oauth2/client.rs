use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::Config;
use crate::configuration::Error as ConfigError;
use crate::secret::Secret;

#[derive(Debug)]
pub struct OAuth2Response {
    pub access_token: Secret<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub id_token: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct ClientError(pub String);

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authorization server, seen from the coordinator.
#[async_trait]
pub trait OAuth2Client: Send + Sync {
    fn authorization_uri(&self, state: &str, callback_uri: &str, nonce_hash: Option<&str>)
        -> String;

    async fn exchange_code(
        &self,
        code: &str,
        callback_uri: &str,
    ) -> Result<OAuth2Response, ClientError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

pub struct HttpOAuth2Client {
    http: reqwest::Client,
    auth_url: Url,
    token_url: Url,
    client_id: String,
    client_secret: Secret<String>,
    scope: String,
}

impl HttpOAuth2Client {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let parse = |name: &str, url: &str| {
            Url::parse(url).map_err(|error| {
                ConfigError::Invalid(format!("Invalid auth.oauth2.{name} '{url}': {error}"))
            })
        };

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.jwks.http_timeout))
                .build()?,
            auth_url: parse("auth_url", &config.auth_url)?,
            token_url: parse("token_url", &config.token_url)?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scopes.join(" "),
        })
    }
}

#[async_trait]
impl OAuth2Client for HttpOAuth2Client {
    fn authorization_uri(
        &self,
        state: &str,
        callback_uri: &str,
        nonce_hash: Option<&str>,
    ) -> String {
        let mut uri = self.auth_url.clone();
        {
            let mut query = uri.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", callback_uri)
                .append_pair("scope", &self.scope)
                .append_pair("state", state);
            if let Some(nonce_hash) = nonce_hash {
                query.append_pair("nonce", nonce_hash);
            }
        }
        uri.to_string()
    }

    #[instrument(skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
        callback_uri: &str,
    ) -> Result<OAuth2Response, ClientError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose()))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", callback_uri),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|error| {
                warn!("Token endpoint request failed: {error}");
                ClientError("Token endpoint unavailable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Token endpoint returned {status}");
            return Err(ClientError(format!("Token endpoint returned {status}")));
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            debug!("Invalid token endpoint response: {error}");
            ClientError("Invalid token endpoint response".to_string())
        })?;

        let expires_at = token
            .expires_in
            .and_then(TimeDelta::try_seconds)
            .map(|lifetime| Utc::now() + lifetime);

        Ok(OAuth2Response {
            access_token: Secret::new(token.access_token),
            expires_at,
            id_token: token.id_token,
        })
    }
}
