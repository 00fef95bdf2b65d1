//! Authentication schemes and their composition.
//!
//! Each scheme turns [`Credentials`] into an [`Identity`] or an [`AuthenticationError`].
//! Schemes are a closed set ([`Authenticator`]) so the enforcer can hold an ordered list of
//! them per transport without trait objects.

mod certificate;
mod chain;
mod credentials;
mod insecure;
pub mod internal;
pub mod jwt;
pub mod oauth2;
pub mod password;
mod user_mapping;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub use certificate::CertificateAuthenticator;
pub use chain::{AuthenticatorChain, ChainFailure};
pub use credentials::{Credentials, INTERNAL_BEARER_HEADER, UI_TOKEN_COOKIE, USER_HEADER};
pub use insecure::InsecureAuthenticator;
pub use jwt::JwtAuthenticator;
pub use oauth2::{OAuth2Authenticator, OAuth2Service};
pub use password::BasicPasswordAuthenticator;
pub use user_mapping::UserMapping;

use crate::command::server::cookie::SetCookie;
use crate::configuration::{Error as ConfigError, ServerTlsConfig};
use crate::identity::Identity;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationType {
    Insecure,
    Password,
    Certificate,
    Jwt,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthenticationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthenticationType::Insecure => "insecure",
            AuthenticationType::Password => "password",
            AuthenticationType::Certificate => "certificate",
            AuthenticationType::Jwt => "jwt",
            AuthenticationType::OAuth2 => "oauth2",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_types")]
    pub types: Vec<AuthenticationType>,
    #[serde(default)]
    pub allow_insecure_over_http: Option<bool>,
    #[serde(default)]
    pub insecure: insecure::Config,
    #[serde(default)]
    pub certificate: certificate::Config,
    #[serde(default)]
    pub password: Option<password::Config>,
    #[serde(default)]
    pub jwt: Option<jwt::Config>,
    #[serde(default)]
    pub oauth2: Option<oauth2::Config>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            types: Self::default_types(),
            allow_insecure_over_http: None,
            insecure: insecure::Config::default(),
            certificate: certificate::Config::default(),
            password: None,
            jwt: None,
            oauth2: None,
        }
    }
}

impl Config {
    fn default_types() -> Vec<AuthenticationType> {
        vec![AuthenticationType::Insecure]
    }

    /// Plaintext connections only ever run the insecure authenticator. Unless configured
    /// otherwise, this is allowed only when insecure is the sole configured scheme.
    pub fn insecure_over_http_allowed(&self) -> bool {
        self.allow_insecure_over_http
            .unwrap_or(self.types == [AuthenticationType::Insecure])
    }

    pub fn validate(&self, tls: Option<&ServerTlsConfig>) -> Result<(), ConfigError> {
        if self.types.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one authentication type must be configured".to_string(),
            ));
        }

        if self.insecure_over_http_allowed() || self.types.contains(&AuthenticationType::Insecure)
        {
            UserMapping::new(&self.insecure.user_mapping)?;
        }

        for kind in &self.types {
            match kind {
                AuthenticationType::Insecure => {}
                AuthenticationType::Password => {
                    let config = self.password.as_ref().ok_or_else(|| {
                        ConfigError::Invalid("Missing [auth.password] section".to_string())
                    })?;
                    config.validate()?;
                }
                AuthenticationType::Certificate => {
                    UserMapping::new(&self.certificate.user_mapping)?;
                    if tls.and_then(|tls| tls.client_ca_bundle.as_ref()).is_none() {
                        warn!("Certificate authentication is enabled without a client CA bundle: no client certificate will ever be presented");
                    }
                }
                AuthenticationType::Jwt => {
                    let config = self.jwt.as_ref().ok_or_else(|| {
                        ConfigError::Invalid("Missing [auth.jwt] section".to_string())
                    })?;
                    config.validate()?;
                }
                AuthenticationType::OAuth2 => {
                    let config = self.oauth2.as_ref().ok_or_else(|| {
                        ConfigError::Invalid("Missing [auth.oauth2] section".to_string())
                    })?;
                    if tls.is_none() {
                        return Err(ConfigError::Invalid(
                            "OAuth2 authentication requires HTTPS to be configured".to_string(),
                        ));
                    }
                    config.validate()?;
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The scheme found nothing to look at.
    NoCredentials,
    NoCertificate,
    InvalidUserMapping,
    InvalidCredential(String),
    InvalidToken,
    NonceMismatch,
    UpstreamUnavailable,
}

impl AuthenticationError {
    /// Absent credentials let the next scheme try; they are not worth reporting.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            AuthenticationError::NoCredentials | AuthenticationError::NoCertificate
        )
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthenticationError::NoCredentials => write!(f, "No credentials"),
            AuthenticationError::NoCertificate => write!(f, "No client certificate"),
            AuthenticationError::InvalidUserMapping => {
                write!(f, "Access Denied: Principal does not map to a user")
            }
            AuthenticationError::InvalidCredential(message) => write!(f, "{message}"),
            AuthenticationError::InvalidToken => write!(f, "Invalid token"),
            AuthenticationError::NonceMismatch => write!(f, "Invalid token: nonce mismatch"),
            AuthenticationError::UpstreamUnavailable => {
                write!(f, "Authentication service unavailable")
            }
        }
    }
}

/// Request facts needed to build a challenge pointing back at this server.
#[derive(Clone, Debug)]
pub struct ChallengeContext {
    pub base_uri: String,
    pub secure: bool,
}

/// A `WWW-Authenticate` value, plus cookies that must accompany it.
#[derive(Clone, Debug, PartialEq)]
pub struct Challenge {
    pub header: String,
    pub cookies: Vec<SetCookie>,
}

impl Challenge {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            cookies: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Authenticate: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials)
        -> Result<Identity, AuthenticationError>;

    async fn challenge(&self, _context: &ChallengeContext) -> Option<Challenge> {
        None
    }
}

pub enum Authenticator {
    Insecure(InsecureAuthenticator),
    Password(BasicPasswordAuthenticator),
    Certificate(CertificateAuthenticator),
    Jwt(JwtAuthenticator),
    OAuth2(OAuth2Authenticator),
}

impl Authenticator {
    pub fn build(
        kind: AuthenticationType,
        config: &Config,
        oauth2: Option<&Arc<OAuth2Service>>,
    ) -> Result<Self, ConfigError> {
        let missing = |section: &str| ConfigError::Invalid(format!("Missing [auth.{section}] section"));

        match kind {
            AuthenticationType::Insecure => Ok(Authenticator::Insecure(
                InsecureAuthenticator::new(&config.insecure)?,
            )),
            AuthenticationType::Password => {
                let password = config.password.as_ref().ok_or_else(|| missing("password"))?;
                Ok(Authenticator::Password(BasicPasswordAuthenticator::new(
                    password,
                )?))
            }
            AuthenticationType::Certificate => Ok(Authenticator::Certificate(
                CertificateAuthenticator::new(&config.certificate)?,
            )),
            AuthenticationType::Jwt => {
                let jwt = config.jwt.as_ref().ok_or_else(|| missing("jwt"))?;
                Ok(Authenticator::Jwt(JwtAuthenticator::new(jwt)?))
            }
            AuthenticationType::OAuth2 => {
                let service = oauth2.ok_or_else(|| missing("oauth2"))?;
                Ok(Authenticator::OAuth2(OAuth2Authenticator::new(Arc::clone(
                    service,
                ))))
            }
        }
    }

    pub fn method(&self) -> AuthenticationType {
        match self {
            Authenticator::Insecure(_) => AuthenticationType::Insecure,
            Authenticator::Password(_) => AuthenticationType::Password,
            Authenticator::Certificate(_) => AuthenticationType::Certificate,
            Authenticator::Jwt(_) => AuthenticationType::Jwt,
            Authenticator::OAuth2(_) => AuthenticationType::OAuth2,
        }
    }

    fn inner(&self) -> &dyn Authenticate {
        match self {
            Authenticator::Insecure(authenticator) => authenticator,
            Authenticator::Password(authenticator) => authenticator,
            Authenticator::Certificate(authenticator) => authenticator,
            Authenticator::Jwt(authenticator) => authenticator,
            Authenticator::OAuth2(authenticator) => authenticator,
        }
    }
}

#[async_trait]
impl Authenticate for Authenticator {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        self.inner().authenticate(credentials).await
    }

    async fn challenge(&self, context: &ChallengeContext) -> Option<Challenge> {
        self.inner().challenge(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_type_names() {
        let config: Config = toml::from_str(
            r#"
            types = ["insecure", "password", "certificate", "jwt", "oauth2"]
            "#,
        )
        .unwrap();

        let names: Vec<_> = config.types.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec!["insecure", "password", "certificate", "jwt", "oauth2"]
        );
    }

    #[test]
    fn test_insecure_over_http_allowed() {
        let config = Config::default();
        assert!(config.insecure_over_http_allowed());

        let config = Config {
            types: vec![AuthenticationType::Password],
            ..Config::default()
        };
        assert!(!config.insecure_over_http_allowed());

        let config = Config {
            types: vec![AuthenticationType::Jwt, AuthenticationType::Insecure],
            allow_insecure_over_http: Some(true),
            ..Config::default()
        };
        assert!(config.insecure_over_http_allowed());

        let config = Config {
            allow_insecure_over_http: Some(false),
            ..Config::default()
        };
        assert!(!config.insecure_over_http_allowed());
    }

    #[test]
    fn test_absent_errors() {
        assert!(AuthenticationError::NoCredentials.is_absent());
        assert!(AuthenticationError::NoCertificate.is_absent());
        assert!(!AuthenticationError::InvalidToken.is_absent());
        assert!(!AuthenticationError::InvalidCredential("x".to_string()).is_absent());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AuthenticationError::InvalidCredential(
                "Access Denied: Invalid credentials".to_string()
            )
            .to_string(),
            "Access Denied: Invalid credentials"
        );
        assert_eq!(AuthenticationError::InvalidToken.to_string(), "Invalid token");
    }

    #[test]
    fn test_reject_empty_types() {
        let config = Config {
            types: vec![],
            ..Config::default()
        };
        assert!(matches!(config.validate(None), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reject_missing_sections() {
        let config = Config {
            types: vec![AuthenticationType::Password],
            ..Config::default()
        };
        assert!(matches!(config.validate(None), Err(ConfigError::Invalid(_))));
    }
}
