use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AuthenticationError, Authenticate, Credentials};
use crate::identity::{Identity, Principal, PrincipalKind};
use crate::secret::Secret;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shared_secret: Option<Secret<String>>,
}

#[derive(Deserialize)]
struct NodeClaims {
    sub: String,
}

/// Node-to-node authentication: a HS256 token signed with the cluster shared secret, whose
/// subject is the calling node id.
pub struct InternalAuthenticator {
    key: DecodingKey,
}

impl InternalAuthenticator {
    /// `None` when no shared secret is configured: internal endpoints are then unreachable.
    pub fn new(config: &Config) -> Option<Self> {
        let secret = config
            .shared_secret
            .as_ref()
            .filter(|secret| !secret.is_blank())?;

        Some(Self {
            key: DecodingKey::from_secret(secret.expose().as_bytes()),
        })
    }
}

#[async_trait]
impl Authenticate for InternalAuthenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let Some(token) = &credentials.internal_bearer else {
            return Err(AuthenticationError::NoCredentials);
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<NodeClaims>(token.expose(), &self.key, &validation)
            .map_err(|error| {
                debug!("Internal token rejected: {error}");
                AuthenticationError::InvalidToken
            })?
            .claims;

        Ok(Identity::new(
            claims.sub.clone(),
            Principal::new(PrincipalKind::Internal, claims.sub),
        ))
    }
}
