mod jwk;
mod key_store;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, instrument};

pub use jwk::Jwk;
pub use key_store::{JwksConfig, JwksKeyStore, KeyFamily, KeySource, VerificationKey};

use super::{
    user_mapping, AuthenticationError, Authenticate, Challenge, ChallengeContext, Credentials,
    UserMapping,
};
use crate::configuration::Error as ConfigError;
use crate::identity::{Identity, Principal, PrincipalKind};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default = "Config::default_principal_field")]
    pub principal_field: String,
    #[serde(default)]
    pub groups_field: Option<String>,
    #[serde(default)]
    pub required_issuer: Option<String>,
    #[serde(default)]
    pub required_audience: Option<String>,
    #[serde(default)]
    pub clock_skew_tolerance: u64,
    #[serde(default)]
    pub user_mapping: user_mapping::Config,
    #[serde(flatten)]
    pub jwks: JwksConfig,
}

impl Config {
    fn default_principal_field() -> String {
        "sub".to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.key_file, &self.jwks_url) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "Exactly one of auth.jwt.key_file and auth.jwt.jwks_url must be set"
                        .to_string(),
                ))
            }
        }
        self.jwks.validate("auth.jwt")?;
        UserMapping::new(&self.user_mapping)?;
        Ok(())
    }

    fn key_source(&self) -> Result<KeySource, ConfigError> {
        if let Some(url) = &self.jwks_url {
            return Ok(KeySource::Jwks(Arc::new(JwksKeyStore::new(url, &self.jwks)?)));
        }

        let Some(path) = &self.key_file else {
            return Err(ConfigError::Invalid(
                "No JWT verification key configured".to_string(),
            ));
        };
        let content = fs::read_to_string(path)?;
        Ok(KeySource::Static(VerificationKey::load(&content)?))
    }
}

/// Claims of a token whose signature, expiry, issuer and audience were verified.
#[derive(Debug)]
pub struct VerifiedToken {
    claims: HashMap<String, Value>,
}

impl VerifiedToken {
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Accepts either an array of strings or a single string.
    pub fn groups(&self, field: Option<&str>) -> Vec<String> {
        let Some(value) = field.and_then(|field| self.claims.get(field)) else {
            return Vec::new();
        };

        match value {
            Value::String(group) => vec![group.clone()],
            Value::Array(groups) => groups
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get("exp").and_then(Value::as_i64)
    }
}

pub struct TokenVerifier {
    keys: KeySource,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: u64,
}

impl TokenVerifier {
    pub fn new(
        keys: KeySource,
        issuer: Option<String>,
        audience: Option<String>,
        leeway: u64,
    ) -> Self {
        Self {
            keys,
            issuer,
            audience,
            leeway,
        }
    }

    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthenticationError> {
        let header = decode_header(token).map_err(|error| {
            debug!("Failed to decode token header: {error}");
            AuthenticationError::InvalidToken
        })?;

        let key = self.keys.resolve(header.kid.as_deref(), header.alg).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token = decode::<HashMap<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|error| {
                debug!("Token validation failed: {error}");
                AuthenticationError::InvalidToken
            })?;

        Ok(VerifiedToken {
            claims: token.claims,
        })
    }
}

/// Turns verified claims into an [`Identity`].
pub struct ClaimMapping {
    principal_field: String,
    groups_field: Option<String>,
    user_mapping: UserMapping,
}

impl ClaimMapping {
    pub fn new(
        principal_field: &str,
        groups_field: Option<&str>,
        user_mapping: &user_mapping::Config,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            principal_field: principal_field.to_string(),
            groups_field: groups_field.map(String::from),
            user_mapping: UserMapping::new(user_mapping)?,
        })
    }

    pub fn identity(&self, token: &VerifiedToken) -> Result<Identity, AuthenticationError> {
        let Some(principal) = token.string_claim(&self.principal_field) else {
            debug!("Token has no '{}' claim", self.principal_field);
            return Err(AuthenticationError::InvalidToken);
        };

        let user = self.user_mapping.map(principal)?;
        Ok(
            Identity::new(user, Principal::new(PrincipalKind::Token, principal))
                .with_groups(token.groups(self.groups_field.as_deref())),
        )
    }
}

/// Bearer token authentication against a static key or a JWKS endpoint.
pub struct JwtAuthenticator {
    verifier: TokenVerifier,
    claims: ClaimMapping,
}

impl JwtAuthenticator {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            verifier: TokenVerifier::new(
                config.key_source()?,
                config.required_issuer.clone(),
                config.required_audience.clone(),
                config.clock_skew_tolerance,
            ),
            claims: ClaimMapping::new(
                &config.principal_field,
                config.groups_field.as_deref(),
                &config.user_mapping,
            )?,
        })
    }
}

#[async_trait]
impl Authenticate for JwtAuthenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let Some(token) = &credentials.bearer else {
            return Err(AuthenticationError::NoCredentials);
        };

        let token = self.verifier.verify(token.expose()).await?;
        self.claims.identity(&token)
    }

    async fn challenge(&self, _context: &ChallengeContext) -> Option<Challenge> {
        Some(Challenge::new(r#"Bearer realm="Coordinator""#))
    }
}
