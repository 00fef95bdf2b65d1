use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::challenge::{hash_nonce, ChallengeStore, PendingChallenge, TokenPoll};
use super::client::{HttpOAuth2Client, OAuth2Client};
use super::state::{StateClaims, StateSigner};
use super::{Config, CALLBACK_PATH, NONCE_COOKIE, NONCE_COOKIE_PATH, UI_COOKIE_PATH};
use crate::command::server::auth::jwt::{ClaimMapping, JwksKeyStore, KeySource, TokenVerifier};
use crate::command::server::auth::{
    AuthenticationError, Challenge, ChallengeContext, UI_TOKEN_COOKIE,
};
use crate::command::server::cookie::SetCookie;
use crate::configuration::Error as ConfigError;
use crate::identity::Identity;
use crate::metrics_provider::OAUTH2_CHALLENGES;
use crate::secret::Secret;

const PROVIDER_ERROR: &str = "OAuth2 provider returned an error";
const INVALID_STATE: &str = "Invalid OAuth2 state";
const CHALLENGE_CONSUMED: &str = "OAuth2 challenge is no longer valid";
const MISSING_CODE: &str = "Missing authorization code";

/// A 303 to the authorization server.
#[derive(Debug)]
pub struct Redirect {
    pub location: String,
    pub cookies: Vec<SetCookie>,
}

/// Query parameters and nonce cookie presented to the callback endpoint.
#[derive(Debug, Default)]
pub struct CallbackRequest<'a> {
    pub code: Option<&'a str>,
    pub state: Option<&'a str>,
    pub error: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

#[derive(Debug, PartialEq)]
pub enum CallbackOutcome {
    Authenticated { ui: bool },
    Rejected { reason: String },
}

#[derive(Debug)]
pub struct CallbackResponse {
    pub outcome: CallbackOutcome,
    pub cookies: Vec<SetCookie>,
}

struct Login {
    ui: bool,
    token: Secret<String>,
    max_age: Option<i64>,
}

/// Drives the challenge, redirect, callback and token-poll steps, and verifies the access
/// tokens the flow hands out.
pub struct OAuth2Service {
    client: Arc<dyn OAuth2Client>,
    challenges: ChallengeStore,
    state: StateSigner,
    verifier: TokenVerifier,
    claims: ClaimMapping,
    web_ui_enabled: bool,
}

impl OAuth2Service {
    pub fn new(config: &Config, web_ui_enabled: bool) -> Result<Self, ConfigError> {
        let client = Arc::new(HttpOAuth2Client::new(config)?);
        Self::with_client(config, client, web_ui_enabled)
    }

    pub fn with_client(
        config: &Config,
        client: Arc<dyn OAuth2Client>,
        web_ui_enabled: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let keys = KeySource::Jwks(Arc::new(JwksKeyStore::new(
            &config.jwks_url,
            &config.jwks,
        )?));

        Ok(Self {
            client,
            challenges: ChallengeStore::new(
                Duration::from_secs(config.challenge_timeout),
                config.max_challenges,
            ),
            state: StateSigner::new(&config.state_key)?,
            verifier: TokenVerifier::new(
                keys,
                Some(config.issuer.clone()),
                Some(config.audience().to_string()),
                0,
            ),
            claims: ClaimMapping::new(
                &config.principal_field,
                config.groups_field.as_deref(),
                &config.user_mapping,
            )?,
            web_ui_enabled,
        })
    }

    fn nonce_cookie(&self, nonce: &Secret<String>, secure: bool) -> SetCookie {
        let max_age = i64::try_from(self.challenges.timeout().as_secs()).unwrap_or(i64::MAX);
        SetCookie::new(NONCE_COOKIE, nonce.expose().as_str(), NONCE_COOKIE_PATH)
            .with_max_age(max_age)
            .with_secure(secure)
    }

    pub fn ui_cookie_cleared(secure: bool) -> SetCookie {
        SetCookie::expired(UI_TOKEN_COOKIE, UI_COOKIE_PATH).with_secure(secure)
    }

    pub async fn challenge(&self, context: &ChallengeContext) -> Challenge {
        let challenge = self.challenges.issue(false).await;
        OAUTH2_CHALLENGES.with_label_values(&["issued"]).inc();

        let header = format!(
            r#"Bearer x_redirect_server="{base}/oauth2/token/initiate/{id}", x_token_server="{base}/oauth2/token/{id}""#,
            base = context.base_uri,
            id = challenge.id
        );

        Challenge {
            header,
            cookies: vec![self.nonce_cookie(&challenge.nonce, context.secure)],
        }
    }

    /// `None` for unknown, expired or already claimed challenges.
    #[instrument(skip(self, context))]
    pub async fn initiate(&self, challenge_id: &str, context: &ChallengeContext) -> Option<Redirect> {
        let challenge = self.challenges.pending(challenge_id).await?;
        self.redirect(&challenge, context)
    }

    /// Browser login for the web UI: the callback sends the user back to the UI.
    pub async fn start_ui_login(&self, context: &ChallengeContext) -> Option<Redirect> {
        let challenge = self.challenges.issue(true).await;
        OAUTH2_CHALLENGES.with_label_values(&["issued"]).inc();
        self.redirect(&challenge, context)
    }

    fn redirect(&self, challenge: &PendingChallenge, context: &ChallengeContext) -> Option<Redirect> {
        let state = self
            .state
            .sign(challenge, self.challenges.timeout())
            .inspect_err(|error| warn!("{error}"))
            .ok()?;

        let callback_uri = format!("{}{CALLBACK_PATH}", context.base_uri);
        let location =
            self.client
                .authorization_uri(&state, &callback_uri, Some(&challenge.nonce_hash));

        Some(Redirect {
            location,
            cookies: vec![self.nonce_cookie(&challenge.nonce, context.secure)],
        })
    }

    #[instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        request: CallbackRequest<'_>,
        context: &ChallengeContext,
    ) -> CallbackResponse {
        let mut cookies =
            vec![SetCookie::expired(NONCE_COOKIE, NONCE_COOKIE_PATH).with_secure(context.secure)];

        match self.login(&request, context).await {
            Ok(login) => {
                OAUTH2_CHALLENGES.with_label_values(&["authenticated"]).inc();
                if self.web_ui_enabled {
                    let mut cookie =
                        SetCookie::new(UI_TOKEN_COOKIE, login.token.expose().as_str(), UI_COOKIE_PATH)
                            .with_secure(context.secure);
                    if let Some(max_age) = login.max_age {
                        cookie = cookie.with_max_age(max_age);
                    }
                    cookies.push(cookie);
                }

                CallbackResponse {
                    outcome: CallbackOutcome::Authenticated { ui: login.ui },
                    cookies,
                }
            }
            Err(reason) => {
                OAUTH2_CHALLENGES.with_label_values(&["rejected"]).inc();
                warn!("Rejected OAuth2 callback: {reason}");
                CallbackResponse {
                    outcome: CallbackOutcome::Rejected { reason },
                    cookies,
                }
            }
        }
    }

    async fn login(
        &self,
        request: &CallbackRequest<'_>,
        context: &ChallengeContext,
    ) -> Result<Login, String> {
        let claims = request
            .state
            .and_then(|state| self.state.verify(state))
            .ok_or_else(|| INVALID_STATE.to_string())?;
        let challenge_id = claims.challenge_id.as_str();

        // Until the nonce cookie matches, the callback may come from anyone holding the state,
        // so the challenge is left untouched.
        let nonce_matches = request
            .nonce
            .is_some_and(|nonce| hash_nonce(nonce) == claims.nonce_hash);
        if !nonce_matches {
            return Err(AuthenticationError::NonceMismatch.to_string());
        }

        if !self
            .challenges
            .begin_exchange(challenge_id, &claims.nonce_hash)
            .await
        {
            return Err(CHALLENGE_CONSUMED.to_string());
        }

        if let Some(error) = request.error {
            debug!("Provider error: {error}");
            self.challenges.fail(challenge_id, PROVIDER_ERROR).await;
            return Err(PROVIDER_ERROR.to_string());
        }

        match self.exchange(request.code, &claims, context).await {
            Ok(login) => {
                self.challenges
                    .complete(challenge_id, login.token.clone())
                    .await;
                Ok(login)
            }
            Err(reason) => {
                self.challenges.fail(challenge_id, &reason).await;
                Err(reason)
            }
        }
    }

    async fn exchange(
        &self,
        code: Option<&str>,
        claims: &StateClaims,
        context: &ChallengeContext,
    ) -> Result<Login, String> {
        let code = code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| MISSING_CODE.to_string())?;

        let callback_uri = format!("{}{CALLBACK_PATH}", context.base_uri);
        let response = self
            .client
            .exchange_code(code, &callback_uri)
            .await
            .map_err(|error| error.to_string())?;

        if let Some(id_token) = &response.id_token {
            let id_token = self
                .verifier
                .verify(id_token)
                .await
                .map_err(|error| error.to_string())?;
            if id_token.string_claim("nonce") != Some(claims.nonce_hash.as_str()) {
                return Err(AuthenticationError::NonceMismatch.to_string());
            }
        }

        let access_token = self
            .verifier
            .verify(response.access_token.expose())
            .await
            .map_err(|error| error.to_string())?;
        let identity = self
            .claims
            .identity(&access_token)
            .map_err(|error| error.to_string())?;
        info!("OAuth2 login completed for '{}'", identity.user());

        let expiry_millis = [
            response.expires_at.map(|expires_at| expires_at.timestamp_millis()),
            access_token.expires_at().map(|exp| exp.saturating_mul(1000)),
        ]
        .into_iter()
        .flatten()
        .min();

        Ok(Login {
            ui: claims.ui,
            token: response.access_token,
            max_age: expiry_millis
                .map(|expiry| (expiry - Utc::now().timestamp_millis()) / 1000),
        })
    }

    pub async fn poll_token(&self, challenge_id: &str) -> TokenPoll {
        self.challenges.poll(challenge_id).await
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<Identity, AuthenticationError> {
        let token = self.verifier.verify(token).await?;
        self.claims.identity(&token)
    }
}
