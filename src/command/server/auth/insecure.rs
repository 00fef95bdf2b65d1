use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    user_mapping, AuthenticationError, Authenticate, Challenge, ChallengeContext, Credentials,
    UserMapping,
};
use crate::configuration::Error as ConfigError;
use crate::identity::{Identity, Principal, PrincipalKind};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user_mapping: user_mapping::Config,
}

/// Trusts the user name the caller asserts, either through the user header or as a basic-auth
/// user with an empty password.
pub struct InsecureAuthenticator {
    user_mapping: UserMapping,
}

impl InsecureAuthenticator {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            user_mapping: UserMapping::new(&config.user_mapping)?,
        })
    }
}

#[async_trait]
impl Authenticate for InsecureAuthenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let user = if let Some(basic) = &credentials.basic {
            if !basic.password.expose().is_empty() {
                debug!("Rejecting password sent to the insecure authenticator");
                return Err(AuthenticationError::InvalidCredential(
                    "Password not allowed for insecure authentication".to_string(),
                ));
            }
            basic.user.as_str()
        } else if let Some(user) = &credentials.asserted_user {
            user.as_str()
        } else {
            return Err(AuthenticationError::NoCredentials);
        };

        if user.is_empty() {
            return Err(AuthenticationError::NoCredentials);
        }

        let mapped = self.user_mapping.map(user)?;
        Ok(Identity::new(
            mapped,
            Principal::new(PrincipalKind::Trusted, user),
        ))
    }

    async fn challenge(&self, _context: &ChallengeContext) -> Option<Challenge> {
        Some(Challenge::new(r#"Basic realm="Coordinator""#))
    }
}
