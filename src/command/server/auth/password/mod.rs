
use std::collections::HashMap;

use argon2::password_hash::PasswordHashString;
use argon2::{Argon2, PasswordVerifier};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{
    user_mapping, AuthenticationError, Authenticate, Challenge, ChallengeContext, Credentials,
    UserMapping,
};
use crate::access_control::AccessDenied;
use crate::configuration::Error as ConfigError;
use crate::identity::{Identity, Principal, PrincipalKind};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user_mapping: user_mapping::Config,
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authenticators.is_empty() {
            return Err(ConfigError::Invalid(
                "Password authentication requires at least one authenticator".to_string(),
            ));
        }
        UserMapping::new(&self.user_mapping)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthenticatorConfig {
    pub name: String,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

/// An external verifier of `(user, password)` pairs.
#[async_trait]
pub trait PasswordAuthenticator: Send + Sync {
    async fn authenticate(&self, user: &str, password: &str) -> Result<Principal, AccessDenied>;
}

/// Verifies passwords against argon2 PHC hashes from the configuration file.
pub struct ArgonPasswordAuthenticator {
    name: String,
    users: HashMap<String, PasswordHashString>,
}

fn build_users(users: &[UserConfig]) -> HashMap<String, PasswordHashString> {
    let mut credentials = HashMap::new();
    for user in users {
        let password_hash = match PasswordHashString::new(&user.password) {
            Ok(hash) => hash,
            Err(err) => {
                warn!("Invalid password hash for user {}: {err}", user.username);
                continue;
            }
        };

        credentials.insert(user.username.clone(), password_hash);
    }

    credentials
}

impl ArgonPasswordAuthenticator {
    pub fn new(config: &AuthenticatorConfig) -> Self {
        Self {
            name: config.name.clone(),
            users: build_users(&config.users),
        }
    }

    #[instrument(skip(self, password), fields(authenticator = %self.name))]
    fn validate_credentials(&self, username: &str, password: &str) -> bool {
        let Some(password_hash) = self.users.get(username) else {
            debug!("Username not found in credentials");
            return false;
        };

        match Argon2::default().verify_password(password.as_bytes(), &password_hash.password_hash())
        {
            Ok(()) => true,
            Err(error) => {
                debug!("Password verification failed: {error}");
                false
            }
        }
    }
}

#[async_trait]
impl PasswordAuthenticator for ArgonPasswordAuthenticator {
    async fn authenticate(&self, user: &str, password: &str) -> Result<Principal, AccessDenied> {
        if self.validate_credentials(user, password) {
            Ok(Principal::new(PrincipalKind::Password, user))
        } else {
            Err(AccessDenied::new(INVALID_CREDENTIALS))
        }
    }
}

/// Runs password authenticators sequentially in registration order.
pub struct PasswordAuthenticatorManager {
    authenticators: Vec<Box<dyn PasswordAuthenticator>>,
}

impl PasswordAuthenticatorManager {
    pub fn new(authenticators: Vec<Box<dyn PasswordAuthenticator>>) -> Self {
        Self { authenticators }
    }

    /// First success wins. When every authenticator denies, the messages are joined with
    /// `" | "` in registration order.
    pub async fn authenticate(&self, user: &str, password: &str) -> Result<Principal, String> {
        let mut messages = Vec::with_capacity(self.authenticators.len());

        for authenticator in &self.authenticators {
            match authenticator.authenticate(user, password).await {
                Ok(principal) => return Ok(principal),
                Err(denied) => messages.push(denied.to_string()),
            }
        }

        if messages.is_empty() {
            messages.push(AccessDenied::new(INVALID_CREDENTIALS).to_string());
        }
        Err(messages.join(" | "))
    }
}

pub struct BasicPasswordAuthenticator {
    manager: PasswordAuthenticatorManager,
    user_mapping: UserMapping,
}

impl BasicPasswordAuthenticator {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let authenticators = config
            .authenticators
            .iter()
            .map(|authenticator| {
                Box::new(ArgonPasswordAuthenticator::new(authenticator))
                    as Box<dyn PasswordAuthenticator>
            })
            .collect();

        Ok(Self::with_manager(
            PasswordAuthenticatorManager::new(authenticators),
            UserMapping::new(&config.user_mapping)?,
        ))
    }

    pub fn with_manager(manager: PasswordAuthenticatorManager, user_mapping: UserMapping) -> Self {
        Self {
            manager,
            user_mapping,
        }
    }
}

#[async_trait]
impl Authenticate for BasicPasswordAuthenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let Some(basic) = &credentials.basic else {
            return Err(AuthenticationError::NoCredentials);
        };

        if basic.password.is_blank() {
            debug!("Rejecting blank password");
            return Err(AuthenticationError::InvalidCredential(
                AccessDenied::new(INVALID_CREDENTIALS).to_string(),
            ));
        }

        let principal = self
            .manager
            .authenticate(&basic.user, basic.password.expose())
            .await
            .map_err(AuthenticationError::InvalidCredential)?;

        let user = self.user_mapping.map(principal.name())?;
        Ok(Identity::new(user, principal))
    }

    async fn challenge(&self, _context: &ChallengeContext) -> Option<Challenge> {
        Some(Challenge::new(r#"Basic realm="Coordinator", charset="UTF-8""#))
    }
}
