use tracing::{debug, instrument, Span};

use super::{Authenticate, Authenticator, Challenge, ChallengeContext, Credentials};
use crate::identity::Identity;
use crate::metrics_provider::AUTH_ATTEMPTS;

#[derive(Debug, PartialEq)]
pub struct ChainFailure {
    pub message: String,
}

/// Ordered list of authenticators tried for one transport.
pub struct AuthenticatorChain {
    authenticators: Vec<Authenticator>,
}

impl AuthenticatorChain {
    pub fn new(authenticators: Vec<Authenticator>) -> Self {
        Self { authenticators }
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// The first authenticator producing an identity wins. Otherwise the failure reasons of
    /// every authenticator that actually found credentials are joined with `" | "`.
    #[instrument(skip(self, credentials), fields(auth_method))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, ChainFailure> {
        let mut messages = Vec::new();

        for authenticator in &self.authenticators {
            let method = authenticator.method().as_str();
            match authenticator.authenticate(credentials).await {
                Ok(identity) => {
                    debug!("Authenticated '{}' using {method}", identity.user());
                    AUTH_ATTEMPTS.with_label_values(&[method, "success"]).inc();
                    Span::current().record("auth_method", method);
                    return Ok(identity);
                }
                Err(error) if error.is_absent() => {
                    AUTH_ATTEMPTS.with_label_values(&[method, "absent"]).inc();
                }
                Err(error) => {
                    debug!("Authentication using {method} failed: {error}");
                    AUTH_ATTEMPTS.with_label_values(&[method, "failure"]).inc();
                    messages.push(error.to_string());
                }
            }
        }

        let message = if messages.is_empty() {
            "Unauthorized".to_string()
        } else {
            messages.join(" | ")
        };
        Err(ChainFailure { message })
    }

    pub async fn challenges(&self, context: &ChallengeContext) -> Vec<Challenge> {
        let mut challenges = Vec::new();
        for authenticator in &self.authenticators {
            if let Some(challenge) = authenticator.challenge(context).await {
                challenges.push(challenge);
            }
        }
        challenges
    }
}
